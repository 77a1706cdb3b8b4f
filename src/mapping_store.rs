use anyhow::Context as AnyhowContext;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::Mutex;
use typesafe_repository::async_ops::{Get, List, Remove, Save};
use typesafe_repository::{IdentityOf, Repository};
use vendus_types::mapping::{Catalog, FieldMapping, MappingRepository};

/// Keeps one catalog's mappings in `{dir}/{catalog}_mappings.yml`.
pub struct FileSystemMappingRepository {
    dir: PathBuf,
    catalog: Catalog,
    lock: Mutex<()>,
}

impl FileSystemMappingRepository {
    pub fn new<P: Into<PathBuf>>(dir: P, catalog: Catalog) -> Self {
        Self {
            dir: dir.into(),
            catalog,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(format!("{}_mappings.yml", self.catalog))
    }

    async fn read(&self) -> Result<Vec<FieldMapping>, anyhow::Error> {
        let path = self.path();
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(err) => return Err(err.into()),
        };
        if content.trim().is_empty() {
            return Ok(vec![]);
        }
        serde_yaml::from_str(&content)
            .with_context(|| format!("Unable to parse {}", path.display()))
    }

    async fn write(&self, mappings: &[FieldMapping]) -> Result<(), anyhow::Error> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path();
        tokio::fs::write(&path, serde_yaml::to_string(mappings)?)
            .await
            .with_context(|| format!("Unable to write {}", path.display()))?;
        Ok(())
    }
}

impl Repository<FieldMapping> for FileSystemMappingRepository {
    type Error = anyhow::Error;
}

#[async_trait]
impl Get<FieldMapping> for FileSystemMappingRepository {
    async fn get_one(
        &self,
        id: &IdentityOf<FieldMapping>,
    ) -> Result<Option<FieldMapping>, anyhow::Error> {
        let _guard = self.lock.lock().await;
        Ok(self.read().await?.into_iter().find(|m| &m.target_field == id))
    }
}

#[async_trait]
impl List<FieldMapping> for FileSystemMappingRepository {
    async fn list(&self) -> Result<Vec<FieldMapping>, anyhow::Error> {
        let _guard = self.lock.lock().await;
        self.read().await
    }
}

#[async_trait]
impl Save<FieldMapping> for FileSystemMappingRepository {
    async fn save(&self, mapping: FieldMapping) -> Result<(), anyhow::Error> {
        let _guard = self.lock.lock().await;
        let mut mappings = self.read().await?;
        match mappings
            .iter_mut()
            .find(|m| m.target_field == mapping.target_field)
        {
            Some(m) => *m = mapping,
            None => mappings.push(mapping),
        }
        self.write(&mappings).await
    }
}

#[async_trait]
impl Remove<FieldMapping> for FileSystemMappingRepository {
    async fn remove(&self, id: &IdentityOf<FieldMapping>) -> Result<(), anyhow::Error> {
        let _guard = self.lock.lock().await;
        let mut mappings = self.read().await?;
        mappings.retain(|m| &m.target_field != id);
        self.write(&mappings).await
    }
}

impl MappingRepository for FileSystemMappingRepository {}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "vendus-bridge-{name}-{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[tokio::test]
    async fn missing_file_lists_nothing() {
        let repo = FileSystemMappingRepository::new(scratch_dir("empty"), Catalog::Products);
        assert!(repo.list().await.unwrap().is_empty());
        assert_eq!(repo.get_one(&"title".to_string()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn save_replaces_by_target_field() {
        let dir = scratch_dir("save");
        let repo = FileSystemMappingRepository::new(&dir, Catalog::Documents);
        repo.save(FieldMapping::new("series", "Série")).await.unwrap();
        repo.save(FieldMapping::new("notes", "Notas")).await.unwrap();
        repo.save(FieldMapping::new("series", "Série").with_source("Serie"))
            .await
            .unwrap();
        assert!(dir.join("documents_mappings.yml").exists());

        let reopened = FileSystemMappingRepository::new(&dir, Catalog::Documents);
        let listed = reopened.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].source(), Some("Serie"));

        reopened.remove(&"series".to_string()).await.unwrap();
        let listed = reopened.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].target_field, "notes");
        let _ = std::fs::remove_dir_all(&dir);
    }
}
