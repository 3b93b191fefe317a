//! Page-collection merge: append the pages of several PDFs into one.
//!
//! ## Why abort on the first bad source?
//!
//! An incomplete merged document is worse than none: users rarely page
//! through a merged file to check every section made it in. So this strategy
//! never isolates failures. The per-item step loads every upload as a page
//! collection, including uploads the requested order leaves out, so the
//! batch stops at the first unreadable file. [`PageMerger::assemble`] then
//! appends the pages in the requested order.
//!
//! ## Object renumbering
//!
//! Each source is renumbered into a disjoint id range before its objects are
//! copied into the accumulator, so references inside one source never
//! collide with another. Attributes a page inherits from its old page tree
//! (`MediaBox`, `Resources`, …) are copied onto the page itself, because the
//! old tree nodes are not carried over.

use super::FormatConverter;
use crate::error::ConversionError;
use crate::model::{base_name, Converted, InputItem, PageMergeOptions, Tool};
use crate::policy::FailurePolicy;
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Name of the single merged output.
pub const MERGED_NAME: &str = "merged.pdf";

const INHERITABLE: &[&[u8]] = &[b"MediaBox", b"CropBox", b"Resources", b"Rotate"];

/// Guard against cyclic `Parent` chains in malformed files.
const MAX_TREE_DEPTH: usize = 64;

/// Page-merge strategy.
#[derive(Debug, Clone)]
pub struct PageMerger {
    options: PageMergeOptions,
}

impl PageMerger {
    pub fn new(options: PageMergeOptions) -> Self {
        Self { options }
    }
}

impl FormatConverter for PageMerger {
    fn tool(&self) -> Tool {
        Tool::PdfMerge
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::AbortOnFirstFailure
    }

    fn output_name(&self, _input_name: &str) -> String {
        MERGED_NAME.to_string()
    }

    fn convert(&self, item: &InputItem) -> Result<Vec<u8>, ConversionError> {
        if !item.bytes.starts_with(b"%PDF") {
            let mut magic = [0u8; 4];
            let n = item.bytes.len().min(4);
            magic[..n].copy_from_slice(&item.bytes[..n]);
            return Err(ConversionError::corrupt(format!(
                "{} is not a PDF (first bytes: {:?})",
                base_name(&item.name),
                magic
            )));
        }
        let doc = Document::load_mem(&item.bytes)
            .map_err(|e| ConversionError::corrupt(format!("{}: {e}", base_name(&item.name))))?;
        debug!("{}: {} pages", base_name(&item.name), doc.get_pages().len());
        Ok(item.bytes.clone())
    }

    fn assemble(&self, converted: Vec<Converted>) -> Result<Vec<Converted>, ConversionError> {
        let order = self.options.resolve(converted.len());
        for &skipped in self.options.order.iter().filter(|&&i| i >= converted.len()) {
            warn!(
                "Page order index {} skipped ({} sources)",
                skipped,
                converted.len()
            );
        }
        if order.is_empty() {
            return Err(ConversionError::InvalidOptions(format!(
                "page order {:?} selects none of the {} uploaded files",
                self.options.order,
                converted.len()
            )));
        }

        let sources: Vec<(&str, &[u8])> = order
            .iter()
            .map(|&i| (converted[i].source.as_str(), converted[i].bytes.as_slice()))
            .collect();
        let bytes = merge_documents(&sources)?;
        info!(
            "Merged {} sources in order {:?} → {} bytes",
            sources.len(),
            order,
            bytes.len()
        );

        Ok(vec![Converted {
            index: 0,
            source: MERGED_NAME.to_string(),
            name: MERGED_NAME.to_string(),
            bytes,
        }])
    }
}

/// Merge `(name, bytes)` sources, in the given order, into one PDF.
pub fn merge_documents(sources: &[(&str, &[u8])]) -> Result<Vec<u8>, ConversionError> {
    let mut next_id: u32 = 1;
    let mut pages: Vec<(ObjectId, Dictionary)> = Vec::new();
    let mut objects: BTreeMap<ObjectId, Object> = BTreeMap::new();

    for (name, bytes) in sources {
        let mut doc = Document::load_mem(bytes)
            .map_err(|e| ConversionError::corrupt(format!("{}: {e}", base_name(name))))?;
        doc.renumber_objects_with(next_id);
        next_id = doc.max_id + 1;

        let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();
        debug!("{}: {} pages", base_name(name), page_ids.len());

        for page_id in page_ids {
            let mut page = doc
                .get_object(page_id)
                .and_then(|o| o.as_dict())
                .map_err(|e| {
                    ConversionError::corrupt(format!("{}: page {page_id:?}: {e}", base_name(name)))
                })?
                .clone();
            for key in INHERITABLE {
                if !page.has(key) {
                    if let Some(value) = inherited(&doc, &page, key) {
                        page.set(key.to_vec(), value);
                    }
                }
            }
            pages.push((page_id, page));
        }

        objects.extend(
            doc.objects
                .into_iter()
                .filter(|(_, obj)| !is_tree_node(obj)),
        );
    }

    if pages.is_empty() {
        return Err(ConversionError::corrupt("merged document has no pages"));
    }

    let mut merged = Document::with_version("1.5");
    merged.objects = objects;
    merged.max_id = next_id;
    let pages_id = merged.new_object_id();

    let mut kids = Vec::with_capacity(pages.len());
    // Ids are unique even when a source repeats: every load is renumbered.
    for (page_id, mut page) in pages {
        page.set("Parent", pages_id);
        merged.objects.insert(page_id, Object::Dictionary(page));
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    merged.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = merged.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    merged.trailer.set("Root", catalog_id);
    merged.compress();

    let mut out = Vec::new();
    merged
        .save_to(&mut out)
        .map_err(|e| ConversionError::encode(format!("PDF serialisation: {e}")))?;
    Ok(out)
}

/// Look `key` up the page's `Parent` chain.
fn inherited(doc: &Document, page: &Dictionary, key: &[u8]) -> Option<Object> {
    let mut parent = page.get(b"Parent").and_then(|o| o.as_reference()).ok();
    for _ in 0..MAX_TREE_DEPTH {
        let node = doc.get_object(parent?).and_then(|o| o.as_dict()).ok()?;
        if let Ok(value) = node.get(key) {
            return Some(value.clone());
        }
        parent = node.get(b"Parent").and_then(|o| o.as_reference()).ok();
    }
    None
}

/// Catalog and page-tree nodes are rebuilt, never copied.
fn is_tree_node(obj: &Object) -> bool {
    match obj.as_dict().and_then(|d| d.get(b"Type")) {
        Ok(Object::Name(name)) => {
            matches!(name.as_slice(), b"Catalog" | b"Pages" | b"Outlines" | b"Outline")
        }
        _ => false,
    }
}
