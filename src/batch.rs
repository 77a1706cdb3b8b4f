use crate::grouping::ProductData;
use crate::invoice::{document_payload, InvoiceData};
use crate::payload::{BuildContext, Payload, PayloadBuilder};
use crate::submission::{SubmissionEngine, SubmissionResult};
use crate::unit::UnitResolver;
use crate::variants::VariantOrchestrator;
use std::collections::HashSet;
use std::sync::Arc;
use vendus_types::mapping::FieldMapping;
use vendus_types::report::{BatchReport, ReportEntry};

pub const PRODUCT_SOFT_LIMIT: usize = 100;
pub const INVOICE_SOFT_LIMIT: usize = 50;

/// Drives a whole upload through the submission pipeline, one entity at a
/// time, and folds every outcome into a [`BatchReport`].
pub struct BatchProcessor {
    builder: PayloadBuilder,
    engine: Arc<SubmissionEngine>,
    variants: VariantOrchestrator,
    units: UnitResolver,
    variant_group: String,
}

impl BatchProcessor {
    pub fn new(
        builder: PayloadBuilder,
        engine: Arc<SubmissionEngine>,
        variants: VariantOrchestrator,
        units: UnitResolver,
        variant_group: String,
    ) -> Self {
        Self {
            builder,
            engine,
            variants,
            units,
            variant_group,
        }
    }

    pub async fn process_products(
        &self,
        products: Vec<ProductData>,
        mappings: &[FieldMapping],
    ) -> BatchReport {
        let total = products.len();
        let mut results = vec![];
        if total > PRODUCT_SOFT_LIMIT {
            results.push(ReportEntry::warning(format!(
                "{total} products in one upload, consider splitting it"
            )));
        }
        let ctx = BuildContext {
            unit_id: self.units.default_unit().await,
        };
        let mut seen = HashSet::new();
        for product in products {
            if !seen.insert(product.reference.to_lowercase()) {
                log::warn!("Duplicate reference {} skipped", product.reference);
                results.push(
                    ReportEntry::skipped("Duplicate reference in upload")
                        .reference(&product.reference),
                );
                continue;
            }
            let entry = self.process_product(&product, mappings, &ctx).await;
            results.push(entry);
        }
        let report = BatchReport::from_entries(total, results);
        log::info!("{}", report.message);
        report
    }

    async fn process_product(
        &self,
        product: &ProductData,
        mappings: &[FieldMapping],
        ctx: &BuildContext,
    ) -> ReportEntry {
        let problems = product.validate();
        if !problems.is_empty() {
            let res = SubmissionResult::invalid(problems.join("; "));
            return entry_for(&product.reference, &res, 0);
        }
        let mut payload = match self.builder.build(&product.raw_entity(), mappings, ctx) {
            Ok(p) => p,
            Err(e) => {
                let res = SubmissionResult::invalid(e.to_string());
                return entry_for(&product.reference, &res, 0);
            }
        };
        self.units.reconcile(&mut payload).await;

        if product.is_composite() {
            self.submit_composite(product, payload).await
        } else {
            let res = self.engine.submit(&payload).await;
            entry_for(&product.reference, &res, product.variants.len())
        }
    }

    async fn submit_composite(&self, product: &ProductData, base: Payload) -> ReportEntry {
        let items = product.variant_items();
        let outcome = self
            .variants
            .create_with_variants(base, &self.variant_group, &items)
            .await;
        let reference = product.reference.as_str();
        if outcome.is_complete() {
            entry_for(reference, &outcome.base, outcome.attempted)
        } else if outcome.is_partial() {
            ReportEntry::partial(format!(
                "Product {reference} saved with {}/{} variants: {}",
                outcome.attached,
                outcome.attempted,
                outcome.notes.join("; ")
            ))
            .reference(reference)
            .status(outcome.base.status_code)
            .variants(outcome.attached)
            .remote_id(outcome.base.remote_id)
        } else {
            entry_for(reference, &outcome.base, 0)
        }
    }

    pub async fn process_invoices(&self, invoices: Vec<InvoiceData>) -> BatchReport {
        let total = invoices.len();
        let mut results = vec![];
        if total > INVOICE_SOFT_LIMIT {
            results.push(ReportEntry::warning(format!(
                "{total} invoices in one upload, consider splitting it"
            )));
        }
        for invoice in invoices {
            let problems = invoice.validate();
            let res = if problems.is_empty() {
                self.engine
                    .create_document(document_payload(&invoice), &invoice.document_number)
                    .await
            } else {
                SubmissionResult::invalid(problems.join("; "))
            };
            let entry = match res.error_message() {
                None => ReportEntry::success(format!(
                    "Invoice {} created with {} items",
                    invoice.document_number,
                    invoice.items.len()
                ))
                .status(res.status_code)
                .remote_id(res.remote_id),
                Some(msg) => with_status(ReportEntry::error(msg), res.status_code),
            };
            results.push(entry.reference(&invoice.document_number));
        }
        let report = BatchReport::from_entries(total, results);
        log::info!("{}", report.message);
        report
    }
}

fn entry_for(reference: &str, res: &SubmissionResult, variants: usize) -> ReportEntry {
    let entry = if res.success {
        let action = res.action.map(|a| a.to_string()).unwrap_or_default();
        ReportEntry::success(format!("Product {reference} {action}"))
            .variants(variants)
            .remote_id(res.remote_id)
    } else {
        ReportEntry::error(res.error_message().unwrap_or_else(|| "Unknown error".to_string()))
    };
    with_status(entry.reference(reference), res.status_code)
}

/// Status `0` means the remote side never answered.
fn with_status(entry: ReportEntry, status_code: u16) -> ReportEntry {
    match status_code {
        0 => entry,
        code => entry.status(code),
    }
}
