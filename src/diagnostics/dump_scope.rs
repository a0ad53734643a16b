//! Scoped verbose query logging.

use std::ops::{Deref, DerefMut};

use super::hooks::QueryDiagnostics;
use super::scope::RequestScope;

/// Enables per-statement debug logging for as long as it is alive.
///
/// Guards nest: logging stays on while any guard on the scope is open. The
/// guard derefs to the [`RequestScope`] so queries can keep running through it,
/// and dropping it always closes its level, including on early return and
/// unwind.
///
/// ```
/// use querywatch::config::DiagnosticsConfig;
/// use querywatch::diagnostics::QueryDiagnostics;
///
/// let diagnostics = QueryDiagnostics::new(DiagnosticsConfig::default());
/// let mut scope = diagnostics.new_scope("/orders");
/// {
///     let mut dumping = diagnostics.dump_scope(&mut scope);
///     diagnostics.before_execute(Some(&mut *dumping), "SELECT 1", &());
///     diagnostics.after_execute(Some(&mut *dumping), "SELECT 1", &()).unwrap();
/// }
/// assert!(!scope.is_dumping());
/// ```
pub struct QueryDumpGuard<'a> {
    diagnostics: &'a QueryDiagnostics,
    scope: &'a mut RequestScope,
}

impl QueryDiagnostics {
    /// Open a verbose logging level on `scope` until the guard is dropped.
    pub fn dump_scope<'a>(&'a self, scope: &'a mut RequestScope) -> QueryDumpGuard<'a> {
        self.enter_dump(scope);
        QueryDumpGuard {
            diagnostics: self,
            scope,
        }
    }
}

impl Deref for QueryDumpGuard<'_> {
    type Target = RequestScope;

    fn deref(&self) -> &RequestScope {
        &*self.scope
    }
}

impl DerefMut for QueryDumpGuard<'_> {
    fn deref_mut(&mut self) -> &mut RequestScope {
        &mut *self.scope
    }
}

impl Drop for QueryDumpGuard<'_> {
    fn drop(&mut self) {
        self.diagnostics.exit_dump(self.scope);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiagnosticsConfig;

    #[test]
    fn test_guard_enables_and_disables() {
        let diagnostics = QueryDiagnostics::new(DiagnosticsConfig::default());
        let mut scope = diagnostics.new_scope("/");

        {
            let guard = diagnostics.dump_scope(&mut scope);
            assert!(guard.is_dumping());
            assert_eq!(guard.dump_depth(), 1);
        }

        assert!(!scope.is_dumping());
        assert_eq!(scope.dump_requested(), 0);
    }

    #[test]
    fn test_nested_guards() {
        let diagnostics = QueryDiagnostics::new(DiagnosticsConfig::default());
        let mut scope = diagnostics.new_scope("/");

        let mut outer = diagnostics.dump_scope(&mut scope);
        {
            let inner = diagnostics.dump_scope(&mut outer);
            assert_eq!(inner.dump_depth(), 2);
        }
        assert!(outer.is_dumping());
        drop(outer);

        assert!(!scope.is_dumping());
    }

    #[test]
    fn test_guard_closes_on_early_return() {
        fn lookup(diagnostics: &QueryDiagnostics, scope: &mut RequestScope) -> Result<(), String> {
            let dumping = diagnostics.dump_scope(scope);
            if dumping.query_count() == 0 {
                return Err("not found".to_string());
            }
            Ok(())
        }

        let diagnostics = QueryDiagnostics::new(DiagnosticsConfig::default());
        let mut scope = diagnostics.new_scope("/");

        assert!(lookup(&diagnostics, &mut scope).is_err());
        assert_eq!(scope.dump_depth(), 0);
    }

    #[test]
    fn test_queries_run_through_guard() {
        let diagnostics = QueryDiagnostics::new(DiagnosticsConfig::default());
        let mut scope = diagnostics.new_scope("/");

        {
            let mut guard = diagnostics.dump_scope(&mut scope);
            diagnostics.before_execute(Some(&mut *guard), "SELECT 1", &());
            diagnostics.after_execute(Some(&mut *guard), "SELECT 1", &()).unwrap();
        }

        assert_eq!(scope.query_count(), 1);
    }
}
