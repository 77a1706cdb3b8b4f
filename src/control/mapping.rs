use super::{ControllerError, MappingServices, Response};
use actix_web::{
    delete, get, post,
    web::{Data, Json, Path},
    HttpResponse,
};
use serde::Deserialize;
use vendus_types::mapping::service::{List, Remove, ResetToDefault, SaveAll};
use vendus_types::mapping::{is_allowed_product_field, Catalog, FieldMapping};

#[derive(Deserialize, Debug)]
#[serde(untagged)]
pub enum MappingInput {
    Many(Vec<FieldMapping>),
    One(FieldMapping),
}

impl MappingInput {
    fn into_vec(self) -> Vec<FieldMapping> {
        match self {
            Self::Many(v) => v,
            Self::One(m) => vec![m],
        }
    }
}

fn catalog(name: &str) -> Result<Catalog, ControllerError> {
    Catalog::try_from(name).ok_or(ControllerError::NotFound)
}

#[get("/api/mappings/{catalog}")]
pub async fn list(path: Path<String>, services: Data<MappingServices>) -> Response {
    let catalog = catalog(&path)?;
    let mappings = services.get(catalog).send(List).await??;
    Ok(HttpResponse::Ok().json(mappings))
}

#[post("/api/mappings/{catalog}")]
pub async fn save(
    path: Path<String>,
    input: Json<MappingInput>,
    services: Data<MappingServices>,
) -> Response {
    let catalog = catalog(&path)?;
    let mut mappings = input.into_inner().into_vec();
    for m in mappings.iter_mut() {
        m.target_field = m.target_field.trim().to_string();
        if m.target_field.is_empty() {
            return Err(ControllerError::InvalidInput {
                field: "target_field".to_string(),
                msg: "Target field is required".to_string(),
            });
        }
        if catalog == Catalog::Products && !is_allowed_product_field(&m.target_field) {
            return Err(ControllerError::InvalidInput {
                field: "target_field".to_string(),
                msg: format!("{} is not accepted by the products endpoint", m.target_field),
            });
        }
    }
    let saved = mappings.len();
    services.get(catalog).send(SaveAll(mappings)).await??;
    log::info!("Saved {saved} {catalog} mappings");
    let mappings = services.get(catalog).send(List).await??;
    Ok(HttpResponse::Ok().json(mappings))
}

#[post("/api/mappings/{catalog}/reset")]
pub async fn reset(path: Path<String>, services: Data<MappingServices>) -> Response {
    let catalog = catalog(&path)?;
    let mappings = services.get(catalog).send(ResetToDefault).await??;
    Ok(HttpResponse::Ok().json(mappings))
}

#[delete("/api/mappings/{catalog}/{field}")]
pub async fn remove(path: Path<(String, String)>, services: Data<MappingServices>) -> Response {
    let (catalog_name, field) = path.into_inner();
    let catalog = catalog(&catalog_name)?;
    services.get(catalog).send(Remove(field)).await??;
    Ok(HttpResponse::NoContent().finish())
}
