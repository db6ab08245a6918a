//! Namespace tree of procedures
//!
//! Leaves are procedures, inner nodes are routers. Paths address leaves by
//! joining segment names with dots: `teams.members.add`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::RpcError;
use crate::procedure::Procedure;

/// Child of a router node
#[derive(Clone)]
pub enum RouterEntry {
    Procedure(Arc<Procedure>),
    Router(Router),
}

impl From<Procedure> for RouterEntry {
    fn from(procedure: Procedure) -> Self {
        Self::Procedure(Arc::new(procedure))
    }
}

impl From<Arc<Procedure>> for RouterEntry {
    fn from(procedure: Arc<Procedure>) -> Self {
        Self::Procedure(procedure)
    }
}

impl From<Router> for RouterEntry {
    fn from(router: Router) -> Self {
        Self::Router(router)
    }
}

/// Immutable, cheaply cloneable procedure tree
#[derive(Clone, Default)]
pub struct Router {
    entries: Arc<BTreeMap<String, RouterEntry>>,
}

impl Router {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a procedure leaf
    #[must_use]
    pub fn procedure(self, name: impl Into<String>, procedure: Procedure) -> Self {
        self.entry(name, procedure)
    }

    /// Add a nested router
    #[must_use]
    pub fn nest(self, name: impl Into<String>, router: Self) -> Self {
        self.entry(name, router)
    }

    /// Add any entry, replacing an existing one with the same name
    ///
    /// Empty names and names containing `.` can never be resolved and are
    /// skipped.
    #[must_use]
    pub fn entry(mut self, name: impl Into<String>, entry: impl Into<RouterEntry>) -> Self {
        let name = name.into();
        if name.is_empty() || name.contains('.') {
            tracing::warn!(name = %name, "skipping router entry with an unresolvable name");
            return self;
        }
        Arc::make_mut(&mut self.entries).insert(name, entry.into());
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&RouterEntry> {
        self.entries.get(name)
    }

    /// Find the procedure at a dotted path
    ///
    /// # Errors
    ///
    /// Returns `PROCEDURE_NOT_FOUND` for an empty path, a missing segment, or
    /// a path that ends on a router
    pub fn resolve(&self, path: &str) -> Result<Arc<Procedure>, RpcError> {
        let not_found = || RpcError::procedure_not_found(path);
        if path.is_empty() {
            return Err(not_found());
        }

        let mut current = self;
        let mut segments = path.split('.').peekable();
        while let Some(segment) = segments.next() {
            let is_last = segments.peek().is_none();
            match current.entries.get(segment) {
                Some(RouterEntry::Procedure(procedure)) if is_last => {
                    return Ok(Arc::clone(procedure));
                }
                Some(RouterEntry::Router(router)) if !is_last => current = router,
                _ => return Err(not_found()),
            }
        }

        Err(not_found())
    }

    /// Every procedure path in the tree, sorted
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        self.collect_paths("", &mut paths);
        paths.sort();
        paths
    }

    fn collect_paths(&self, prefix: &str, out: &mut Vec<String>) {
        for (name, entry) in &*self.entries {
            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{prefix}.{name}")
            };
            match entry {
                RouterEntry::Procedure(_) => out.push(path),
                RouterEntry::Router(router) => router.collect_paths(&path, out),
            }
        }
    }

    /// Number of top-level entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("paths", &self.paths())
            .finish()
    }
}

/// Build a router from named entries
pub fn router<N, E>(entries: impl IntoIterator<Item = (N, E)>) -> Router
where
    N: Into<String>,
    E: Into<RouterEntry>,
{
    entries
        .into_iter()
        .fold(Router::new(), |router, (name, entry)| router.entry(name, entry))
}

/// Combine the top-level entries of several routers
///
/// On a name collision the later router wins.
pub fn merge_routers(routers: impl IntoIterator<Item = Router>) -> Router {
    let mut merged = BTreeMap::new();
    for router in routers {
        for (name, entry) in &*router.entries {
            if merged.insert(name.clone(), entry.clone()).is_some() {
                tracing::debug!(name = %name, "router merge replaced entry");
            }
        }
    }
    Router {
        entries: Arc::new(merged),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::error::ErrorCode;
    use crate::procedure::procedure;
    use crate::protocol::CallType;

    fn echo() -> Procedure {
        procedure().query(|v: Value, _session| async move { Ok(v) })
    }

    fn bump() -> Procedure {
        procedure().mutation(|v: Value, _session| async move { Ok(v) })
    }

    fn tree() -> Router {
        Router::new().procedure("ping", echo()).nest(
            "teams",
            Router::new()
                .procedure("list", echo())
                .nest("members", router([("add", bump())])),
        )
    }

    #[test]
    fn resolves_nested_paths() {
        let router = tree();
        assert!(router.resolve("ping").is_ok());
        let add = router.resolve("teams.members.add").unwrap();
        assert_eq!(add.call_type(), CallType::Mutation);
    }

    #[test]
    fn unresolvable_paths_are_not_found() {
        let router = tree();
        for path in ["", "nope", "teams", "teams.members", "ping.extra", "teams..list"] {
            let err = router.resolve(path).unwrap_err();
            assert_eq!(err.code, ErrorCode::ProcedureNotFound, "path: {path}");
        }
    }

    #[test]
    fn lists_sorted_paths() {
        assert_eq!(
            tree().paths(),
            vec!["ping", "teams.list", "teams.members.add"]
        );
    }

    #[test]
    fn merge_later_wins() {
        let first = router([("a", echo()), ("shared", echo())]);
        let second = router([("b", echo()), ("shared", bump())]);

        let merged = merge_routers([first, second]);
        assert_eq!(merged.len(), 3);
        assert_eq!(
            merged.resolve("shared").unwrap().call_type(),
            CallType::Mutation
        );
    }

    #[test]
    fn dotted_names_are_skipped() {
        let router = Router::new().procedure("a.b", echo()).procedure("", echo());
        assert!(router.is_empty());
        assert_eq!(
            router.resolve("a.b").unwrap_err().code,
            ErrorCode::ProcedureNotFound
        );
    }

    #[test]
    fn building_does_not_touch_clones() {
        let base = router([("a", echo())]);
        let extended = base.clone().procedure("b", echo());
        assert_eq!(base.len(), 1);
        assert_eq!(extended.len(), 2);
    }
}
