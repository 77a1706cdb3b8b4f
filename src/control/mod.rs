use crate::batch::BatchProcessor;
use crate::grouping::{
    build_invoice_data, build_product_data, group_invoices, group_products, map_invoice_headers,
    map_product_headers, InvoicePreview, ProductData, ProductPreview,
};
use crate::invoice::InvoiceData;
use crate::tabular::{read_sheet, Sheet};
use actix::Addr;
use actix_multipart::form::{tempfile::TempFile, text::Text, MultipartForm};
use actix_web::{http::StatusCode, post, web::Data, HttpResponse};
use anyhow::Context as AnyhowContext;
use derive_more::{Display, Error};
use futures::FutureExt;
use serde_json::json;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use time::OffsetDateTime;
use vendus_types::mapping::service::{ActiveOrdered, MappingService};
use vendus_types::mapping::Catalog;
use vendus_types::report::BatchReport;

pub mod mapping;

pub type Response = Result<HttpResponse, ControllerError>;

#[derive(Debug, Display, Error)]
pub enum ControllerError {
    NotFound,
    #[error(ignore)]
    InternalServerError(anyhow::Error),
    #[error(ignore)]
    #[display("Invalid field {field}")]
    InvalidInput {
        field: String,
        msg: String,
    },
}

impl From<anyhow::Error> for ControllerError {
    fn from(err: anyhow::Error) -> Self {
        Self::InternalServerError(err)
    }
}

impl From<actix::MailboxError> for ControllerError {
    fn from(err: actix::MailboxError) -> Self {
        Self::InternalServerError(err.into())
    }
}

impl actix_web::error::ResponseError for ControllerError {
    fn status_code(&self) -> StatusCode {
        use ControllerError::*;
        match self {
            NotFound => StatusCode::NOT_FOUND,
            InvalidInput { .. } => StatusCode::BAD_REQUEST,
            InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        log::warn!("{self:?}");
        use ControllerError::*;
        let message = match self {
            NotFound => "Not found".to_string(),
            InvalidInput { field, msg } => format!("{field}: {msg}"),
            InternalServerError(err) => format!("{err:#}"),
        };
        HttpResponse::build(self.status_code()).json(json!({
            "success": false,
            "message": message,
        }))
    }
}

/// Active mapping catalogs served to the upload and mapping endpoints.
pub struct MappingServices {
    pub products: Addr<MappingService>,
    pub documents: Addr<MappingService>,
}

impl MappingServices {
    pub fn get(&self, catalog: Catalog) -> &Addr<MappingService> {
        match catalog {
            Catalog::Products => &self.products,
            Catalog::Documents => &self.documents,
        }
    }
}

#[derive(MultipartForm, Debug)]
pub struct UploadForm {
    excel_file: TempFile,
    import_type: Option<Text<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImportType {
    Products,
    Invoices,
}

impl UploadForm {
    fn import_type(&self) -> Result<ImportType, ControllerError> {
        let kind = self
            .import_type
            .as_ref()
            .map(|t| t.trim().to_lowercase())
            .unwrap_or_default();
        match kind.as_str() {
            "" | "products" | "product" => Ok(ImportType::Products),
            "invoices" | "invoice" | "documents" => Ok(ImportType::Invoices),
            other => Err(ControllerError::InvalidInput {
                field: "import_type".to_string(),
                msg: format!("Unknown import type {other:?}"),
            }),
        }
    }

    async fn sheet(&self) -> Result<Sheet, ControllerError> {
        let bytes = tokio::fs::read(self.excel_file.file.path())
            .await
            .context("Unable to read uploaded file")?;
        let sheet = read_sheet(bytes, self.excel_file.file_name.as_deref()).map_err(|err| {
            ControllerError::InvalidInput {
                field: "excel_file".to_string(),
                msg: format!("{err:#}"),
            }
        })?;
        if sheet.rows.is_empty() {
            return Err(ControllerError::InvalidInput {
                field: "excel_file".to_string(),
                msg: "File has no data rows".to_string(),
            });
        }
        Ok(sheet)
    }
}

fn products_from(sheet: &Sheet) -> Result<Vec<ProductData>, ControllerError> {
    let map = map_product_headers(&sheet.header).ok_or_else(|| ControllerError::InvalidInput {
        field: "excel_file".to_string(),
        msg: "Required columns not found: Ref. Vendus, Nome, Size, UPC No., PVP".to_string(),
    })?;
    Ok(group_products(sheet, &map)
        .iter()
        .map(|g| build_product_data(g, sheet, &map))
        .collect())
}

async fn invoices_from(
    sheet: &Sheet,
    services: &MappingServices,
) -> Result<Vec<InvoiceData>, ControllerError> {
    let mappings = services.documents.send(ActiveOrdered).await??;
    let map = map_invoice_headers(&sheet.header, &mappings).ok_or_else(|| {
        ControllerError::InvalidInput {
            field: "excel_file".to_string(),
            msg: "Required invoice columns not found: item_reference, item_title, item_quantity, item_price"
                .to_string(),
        }
    })?;
    Ok(group_invoices(sheet, &map, OffsetDateTime::now_utc())
        .iter()
        .map(|g| build_invoice_data(g, sheet, &map))
        .collect())
}

#[post("/upload")]
pub async fn upload(
    q: MultipartForm<UploadForm>,
    batch: Data<Arc<BatchProcessor>>,
    services: Data<MappingServices>,
) -> Response {
    let form = q.into_inner();
    let import_type = form.import_type()?;
    let sheet = form.sheet().await?;
    log::info!(
        "Processing {:?} upload {} with {} rows",
        import_type,
        form.excel_file.file_name.as_deref().unwrap_or("<unnamed>"),
        sheet.rows.len()
    );
    let report = match import_type {
        ImportType::Products => {
            let products = products_from(&sheet)?;
            let mappings = services.products.send(ActiveOrdered).await??;
            guarded(batch.process_products(products, &mappings)).await
        }
        ImportType::Invoices => {
            let invoices = invoices_from(&sheet, &services).await?;
            guarded(batch.process_invoices(invoices)).await
        }
    };
    Ok(HttpResponse::Ok().json(report))
}

/// Turns a panic inside a batch into a failed report.
async fn guarded<F: Future<Output = BatchReport>>(run: F) -> BatchReport {
    AssertUnwindSafe(run).catch_unwind().await.unwrap_or_else(|_| {
        log::error!("Batch processing panicked");
        BatchReport::failure("Processing was aborted by an internal error")
    })
}

#[post("/upload/preview")]
pub async fn preview(q: MultipartForm<UploadForm>, services: Data<MappingServices>) -> Response {
    let form = q.into_inner();
    let sheet = form.sheet().await?;
    let body = match form.import_type()? {
        ImportType::Products => {
            let products: Vec<ProductPreview> =
                products_from(&sheet)?.iter().map(ProductPreview::from).collect();
            json!({
                "success": true,
                "total_products": products.len(),
                "products": products,
            })
        }
        ImportType::Invoices => {
            let invoices: Vec<InvoicePreview> = invoices_from(&sheet, &services)
                .await?
                .iter()
                .map(InvoicePreview::from)
                .collect();
            json!({
                "success": true,
                "total_invoices": invoices.len(),
                "invoices": invoices,
            })
        }
    };
    Ok(HttpResponse::Ok().json(body))
}
