use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use tracing::{debug, trace};

use datalchemy_core::{DependencyGraph, Identifier};

use crate::adapter::SaveBatch;
use crate::errors::GenerationError;
use crate::generators::reference::Subscription;

/// Table dependencies plus the subscriptions that forward committed parent
/// rows to child reference generators.
///
/// Registration happens while tasks are built. Once sealed, the graph is
/// frozen and only delivery reads it.
#[derive(Debug, Default)]
pub struct ReferenceResolver {
    dependencies: RwLock<DependencyGraph>,
    subscriptions: RwLock<HashMap<Identifier, Vec<Subscription>>>,
    sealed: AtomicBool,
}

impl ReferenceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a table that takes part in the run, with or without parents.
    pub fn add_table(&self, table: &Identifier) -> Result<(), GenerationError> {
        self.ensure_open(table)?;
        self.dependencies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(table.clone())
            .or_default();
        Ok(())
    }

    /// Make `child` depend on `parent` and route parent commits to `subscription`.
    ///
    /// Each reference generator registers its own subscription, so two
    /// columns referencing the same parent both receive every commit.
    pub fn register(
        &self,
        child: &Identifier,
        parent: &Identifier,
        subscription: Subscription,
    ) -> Result<(), GenerationError> {
        self.ensure_open(child)?;
        self.dependencies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(child.clone())
            .or_default()
            .insert(parent.clone());
        self.subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(parent.clone())
            .or_default()
            .push(subscription);
        debug!(child = %child, parent = %parent, "reference registered");
        Ok(())
    }

    /// Freeze registration; execution may start afterwards.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::SeqCst);
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
    }

    /// Child -> parents view of everything registered.
    pub fn dependencies(&self) -> DependencyGraph {
        self.dependencies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Forward the committed rows of a parent batch. Returns values queued.
    pub fn on_committed(&self, batch: &SaveBatch) -> usize {
        let subscriptions = self
            .subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(subscribers) = subscriptions.get(&batch.schema.id) else {
            return 0;
        };
        let queued = subscribers
            .iter()
            .filter(|subscription| !subscription.is_closed())
            .map(|subscription| subscription.deliver(batch))
            .sum();
        trace!(table = %batch.schema.id, queued, "committed rows forwarded");
        queued
    }

    fn ensure_open(&self, table: &Identifier) -> Result<(), GenerationError> {
        if self.is_sealed() {
            return Err(GenerationError::ResolverSealed(table.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::adapter::SampleReader;
    use crate::generators::Generator;
    use crate::generators::reference::BufferedReference;
    use datalchemy_core::{Column, DatasetSchema, TargetType, TypeKind, Value};

    struct NoSample;

    #[async_trait]
    impl SampleReader for NoSample {
        async fn read_values(
            &self,
            _cancel: &CancellationToken,
        ) -> Result<Vec<Value>, GenerationError> {
            Ok(Vec::new())
        }
    }

    fn base() -> Identifier {
        Identifier::new("public", "base")
    }

    fn child() -> Identifier {
        Identifier::new("public", "child")
    }

    #[test]
    fn registration_builds_dependency_graph() {
        let resolver = ReferenceResolver::new();
        let (_generator, subscription) = BufferedReference::new(base(), "id", Arc::new(NoSample));
        resolver.add_table(&base()).unwrap();
        resolver.register(&child(), &base(), subscription).unwrap();

        let graph = resolver.dependencies();
        assert!(graph[&base()].is_empty());
        assert_eq!(graph[&child()], BTreeSet::from([base()]));
    }

    #[test]
    fn sealed_resolver_rejects_registration() {
        let resolver = ReferenceResolver::new();
        resolver.seal();
        let (_generator, subscription) = BufferedReference::new(base(), "id", Arc::new(NoSample));
        assert!(matches!(
            resolver.register(&child(), &base(), subscription),
            Err(GenerationError::ResolverSealed(_))
        ));
    }

    #[tokio::test]
    async fn commits_fan_out_to_every_subscription() {
        let resolver = ReferenceResolver::new();
        let (mut first, first_sub) = BufferedReference::new(base(), "id", Arc::new(NoSample));
        let (mut second, second_sub) = BufferedReference::new(base(), "id", Arc::new(NoSample));
        resolver.register(&child(), &base(), first_sub).unwrap();
        resolver.register(&child(), &base(), second_sub).unwrap();
        resolver.seal();

        let schema = Arc::new(DatasetSchema::new(
            base(),
            vec![Column::new("id", TargetType::new(TypeKind::Int, "integer"))],
        ));
        let mut batch = SaveBatch::new(schema, BTreeSet::new(), 1);
        batch.push(vec![Value::Int64(5)]);
        assert_eq!(resolver.on_committed(&batch), 2);

        let cancel = CancellationToken::new();
        assert_eq!(first.produce(&cancel).await.unwrap(), Value::Int64(5));
        assert_eq!(second.produce(&cancel).await.unwrap(), Value::Int64(5));
    }
}
