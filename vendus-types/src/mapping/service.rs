use crate::mapping::{active_ordered, Catalog, FieldMapping, MappingRepository};
use actix::prelude::*;
use anyhow::Context as AnyhowContext;
use std::sync::Arc;
use typesafe_repository::IdentityOf;

pub struct MappingService {
    repo: Arc<dyn MappingRepository>,
    catalog: Catalog,
}

impl MappingService {
    pub fn new(repo: Arc<dyn MappingRepository>, catalog: Catalog) -> Self {
        Self { repo, catalog }
    }
}

impl Actor for MappingService {
    type Context = Context<Self>;
}

#[derive(Message)]
#[rtype(result = "Result<Vec<FieldMapping>, anyhow::Error>")]
pub struct List;

/// Active mappings in builder order.
#[derive(Message)]
#[rtype(result = "Result<Vec<FieldMapping>, anyhow::Error>")]
pub struct ActiveOrdered;

#[derive(Message)]
#[rtype(result = "Result<(), anyhow::Error>")]
pub struct Save(pub FieldMapping);

#[derive(Message)]
#[rtype(result = "Result<(), anyhow::Error>")]
pub struct SaveAll(pub Vec<FieldMapping>);

#[derive(Message)]
#[rtype(result = "Result<(), anyhow::Error>")]
pub struct Remove(pub IdentityOf<FieldMapping>);

/// Drops every stored mapping and stores the catalog defaults.
#[derive(Message)]
#[rtype(result = "Result<Vec<FieldMapping>, anyhow::Error>")]
pub struct ResetToDefault;

/// Stores the defaults only when the catalog is empty.
#[derive(Message)]
#[rtype(result = "Result<(), anyhow::Error>")]
pub struct Bootstrap;

impl Handler<List> for MappingService {
    type Result = ResponseActFuture<Self, Result<Vec<FieldMapping>, anyhow::Error>>;

    fn handle(&mut self, _: List, _: &mut Self::Context) -> Self::Result {
        let repo = self.repo.clone();
        Box::pin(
            async move { repo.list().await.context("Unable to list field mappings") }
                .into_actor(self),
        )
    }
}

impl Handler<ActiveOrdered> for MappingService {
    type Result = ResponseActFuture<Self, Result<Vec<FieldMapping>, anyhow::Error>>;

    fn handle(&mut self, _: ActiveOrdered, _: &mut Self::Context) -> Self::Result {
        let repo = self.repo.clone();
        let catalog = self.catalog;
        Box::pin(
            async move {
                let list = repo.list().await.context("Unable to list field mappings")?;
                Ok(active_ordered(catalog, list))
            }
            .into_actor(self),
        )
    }
}

impl Handler<Save> for MappingService {
    type Result = ResponseActFuture<Self, Result<(), anyhow::Error>>;

    fn handle(&mut self, Save(mapping): Save, _: &mut Self::Context) -> Self::Result {
        let repo = self.repo.clone();
        Box::pin(
            async move {
                let field = mapping.target_field.clone();
                repo.save(mapping)
                    .await
                    .with_context(|| format!("Unable to save mapping for {field}"))
            }
            .into_actor(self),
        )
    }
}

impl Handler<SaveAll> for MappingService {
    type Result = ResponseActFuture<Self, Result<(), anyhow::Error>>;

    fn handle(&mut self, SaveAll(mappings): SaveAll, _: &mut Self::Context) -> Self::Result {
        let repo = self.repo.clone();
        Box::pin(
            async move {
                for mapping in mappings {
                    let field = mapping.target_field.clone();
                    repo.save(mapping)
                        .await
                        .with_context(|| format!("Unable to save mapping for {field}"))?;
                }
                Ok(())
            }
            .into_actor(self),
        )
    }
}

impl Handler<Remove> for MappingService {
    type Result = ResponseActFuture<Self, Result<(), anyhow::Error>>;

    fn handle(&mut self, Remove(field): Remove, _: &mut Self::Context) -> Self::Result {
        let repo = self.repo.clone();
        Box::pin(
            async move {
                repo.remove(&field)
                    .await
                    .with_context(|| format!("Unable to remove mapping for {field}"))
            }
            .into_actor(self),
        )
    }
}

impl Handler<ResetToDefault> for MappingService {
    type Result = ResponseActFuture<Self, Result<Vec<FieldMapping>, anyhow::Error>>;

    fn handle(&mut self, _: ResetToDefault, _: &mut Self::Context) -> Self::Result {
        let repo = self.repo.clone();
        let catalog = self.catalog;
        Box::pin(
            async move {
                for mapping in repo.list().await? {
                    repo.remove(&mapping.target_field).await?;
                }
                let defaults = catalog.defaults();
                for mapping in defaults.clone() {
                    repo.save(mapping).await?;
                }
                log::info!("Restored default {catalog} mappings");
                Ok(defaults)
            }
            .into_actor(self),
        )
    }
}

impl Handler<Bootstrap> for MappingService {
    type Result = ResponseActFuture<Self, Result<(), anyhow::Error>>;

    fn handle(&mut self, _: Bootstrap, _: &mut Self::Context) -> Self::Result {
        let repo = self.repo.clone();
        let catalog = self.catalog;
        Box::pin(
            async move {
                if !repo.list().await?.is_empty() {
                    return Ok(());
                }
                for mapping in catalog.defaults() {
                    repo.save(mapping).await?;
                }
                log::info!("Created default {catalog} mappings");
                Ok(())
            }
            .into_actor(self),
        )
    }
}
