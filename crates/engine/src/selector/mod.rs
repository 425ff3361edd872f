//! Selector evaluation. One selector type, dispatched on its kind.

pub mod path;
pub mod query;

use common::models::{SelectorKind, TargetSelector};
use scraper::Html;

use crate::error::SelectorSyntaxError;

/// Text fragments matched by `selector`, in document order.
///
/// Matching nothing is a normal outcome and yields an empty vec; only a
/// malformed expression is an error.
pub fn evaluate(
    document: &Html,
    selector: &TargetSelector,
) -> Result<Vec<String>, SelectorSyntaxError> {
    match selector.kind() {
        SelectorKind::StructuralPath => path::evaluate(document, selector.expression()),
        SelectorKind::DeclarativeQuery => query::evaluate(document, selector.expression()),
    }
}

/// Checks the expression syntax without a document.
pub fn validate(selector: &TargetSelector) -> Result<(), SelectorSyntaxError> {
    match selector.kind() {
        SelectorKind::StructuralPath => path::parse(selector.expression()).map(|_| ()),
        SelectorKind::DeclarativeQuery => query::compile(selector.expression()).map(|_| ()),
    }
}
