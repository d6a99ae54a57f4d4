use std::sync::{Arc, Mutex};

use runplane::cluster::{
    BoxFuture, ClusterClient, ClusterError, ClusterErrorKind, ClusterObject, InMemoryCluster, ObjectKey,
};

#[derive(Debug, Clone)]
struct Rule {
    operation: &'static str,
    name_contains: String,
    kind: ClusterErrorKind,
}

/// An in-memory cluster that fails chosen operations on chosen objects.
///
/// - `operation` is one of `create`, `get`, `replace`, `delete`, `logs`
///   (or `*` for all of them).
/// - a call matches when the object name contains `name_contains`.
///
/// Non-matching calls go straight to the wrapped [`InMemoryCluster`], which
/// stays inspectable via [`FlakyCluster::inner`].
#[derive(Debug, Clone, Default)]
pub struct FlakyCluster {
    inner: InMemoryCluster,
    rules: Arc<Mutex<Vec<Rule>>>,
}

impl FlakyCluster {
    pub fn new(inner: InMemoryCluster) -> Self {
        Self {
            inner,
            rules: Arc::default(),
        }
    }

    pub fn inner(&self) -> &InMemoryCluster {
        &self.inner
    }

    pub fn fail_on(&self, operation: &'static str, name_contains: &str, kind: ClusterErrorKind) {
        self.rules.lock().unwrap().push(Rule {
            operation,
            name_contains: name_contains.to_string(),
            kind,
        });
    }

    /// Drop every failure rule.
    pub fn heal(&self) {
        self.rules.lock().unwrap().clear();
    }

    fn check(&self, operation: &str, key: &ObjectKey) -> Result<(), ClusterError> {
        let rules = self.rules.lock().unwrap();
        match rules.iter().find(|r| {
            (r.operation == operation || r.operation == "*") && key.name.contains(&r.name_contains)
        }) {
            Some(rule) => Err(ClusterError::new(
                rule.kind,
                format!("injected {operation} failure for {key}"),
            )),
            None => Ok(()),
        }
    }
}

impl ClusterClient for FlakyCluster {
    fn create<'a>(&'a self, object: ClusterObject) -> BoxFuture<'a, Result<ClusterObject, ClusterError>> {
        Box::pin(async move {
            self.check("create", &object.key())?;
            self.inner.create(object).await
        })
    }

    fn get<'a>(&'a self, key: &'a ObjectKey) -> BoxFuture<'a, Result<Option<ClusterObject>, ClusterError>> {
        Box::pin(async move {
            self.check("get", key)?;
            self.inner.get(key).await
        })
    }

    fn replace<'a>(&'a self, object: ClusterObject) -> BoxFuture<'a, Result<ClusterObject, ClusterError>> {
        Box::pin(async move {
            self.check("replace", &object.key())?;
            self.inner.replace(object).await
        })
    }

    fn delete<'a>(&'a self, key: &'a ObjectKey) -> BoxFuture<'a, Result<bool, ClusterError>> {
        Box::pin(async move {
            self.check("delete", key)?;
            self.inner.delete(key).await
        })
    }

    fn logs<'a>(&'a self, key: &'a ObjectKey) -> BoxFuture<'a, Result<Option<String>, ClusterError>> {
        Box::pin(async move {
            self.check("logs", key)?;
            self.inner.logs(key).await
        })
    }
}
