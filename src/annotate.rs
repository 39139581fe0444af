//! # Annotation Layer Module
//!
//! ## Purpose
//! Idempotent add/remove of keyword tags, highlight markers and relevance
//! banners on candidate elements. Every annotation is a reversible document
//! side effect; a full clear restores the document to its unannotated state.
//!
//! ## Input/Output Specification
//! - **Input**: Candidate elements, matched keyword lists, threshold flag
//! - **Output**: Tag containers, marker classes, banner elements
//! - **Invariant**: At most one annotation of each kind per element
//!
//! ## Key Features
//! - Full teardown that never touches unrelated document content
//! - Silent skip of elements detached between selection and annotation
//! - One-time style registration keyed by a fixed element id

use crate::dom::{Document, NodeId, Selector};

/// Class carried by elements whose match count crossed the threshold
pub const HIGHLIGHTED_ITEM_CLASS: &str = "kwh-highlighted-item";
/// Class of the inline "highly relevant" banner
pub const BANNER_CLASS: &str = "kwh-highlight-info";
/// Class of the keyword tag container
pub const KEYWORD_TAGS_CLASS: &str = "kwh-keyword-tags";
/// Id of the injected style element
pub const STYLE_ELEMENT_ID: &str = "kwh-custom-styles";

/// Banner text shown on highly relevant elements
const BANNER_TEXT: &str = "🔥 Highly relevant!";

const TAG_STYLE: &str = "\
    display: inline-block;\
    margin: 4px 6px 0 0;\
    padding: 4px 8px;\
    font-size: 14px;\
    background-color: #d32f2f;\
    color: #fff;\
    border-radius: 4px;\
    font-weight: bold;";

const BANNER_STYLE: &str = "\
    background: linear-gradient(45deg, #ff6b35, #f7931e);\
    color: #fff;\
    font-weight: 900;\
    padding: 6px 12px;\
    margin: 4px 0 10px 0;\
    border-radius: 6px;\
    font-size: 15px;\
    display: inline-block;\
    white-space: nowrap;";

/// Register annotation styles once per document. Subsequent calls are no-ops,
/// keyed by the fixed style-element id.
pub fn inject_styles(doc: &Document) {
    if !doc.query_all(&Selector::Id(STYLE_ELEMENT_ID.to_string())).is_empty() {
        return;
    }
    let style = doc.create_element("style");
    doc.set_id(style, STYLE_ELEMENT_ID);
    doc.set_text(
        style,
        &format!(
            ".{HIGHLIGHTED_ITEM_CLASS} {{ border: 2px solid #ff9800; \
             background-color: #fff3e0; border-radius: 8px; }} \
             .{KEYWORD_TAGS_CLASS} {{ display: flex; flex-wrap: wrap; }} \
             .{KEYWORD_TAGS_CLASS} span {{ {TAG_STYLE} }} \
             .{BANNER_CLASS} {{ {BANNER_STYLE} }}"
        ),
    );
    doc.prepend_child(doc.root(), style);
}

/// Remove every tag container, banner and marker class from the document.
/// Safe to call when nothing is annotated.
pub fn clear_all(doc: &Document) {
    for tag_container in doc.query_all(&Selector::Class(KEYWORD_TAGS_CLASS.to_string())) {
        doc.detach(tag_container);
    }
    for banner in doc.query_all(&Selector::Class(BANNER_CLASS.to_string())) {
        doc.detach(banner);
    }
    for item in doc.query_all(&Selector::Class(HIGHLIGHTED_ITEM_CLASS.to_string())) {
        doc.remove_class(item, HIGHLIGHTED_ITEM_CLASS);
    }
}

/// Annotate one candidate element with its matched keywords and, when the
/// threshold was crossed, a highlight marker and banner. Elements detached
/// since selection are skipped silently.
pub fn annotate(
    doc: &Document,
    element: NodeId,
    keywords_to_display: &[String],
    crossed_threshold: bool,
    banner_anchor: &Selector,
) {
    if !doc.is_connected(element) {
        return;
    }

    if !keywords_to_display.is_empty() {
        append_tags(doc, element, keywords_to_display);
    }

    if crossed_threshold {
        doc.add_class(element, HIGHLIGHTED_ITEM_CLASS);

        let banner = doc.create_element("div");
        doc.add_class(banner, BANNER_CLASS);
        doc.set_text(banner, BANNER_TEXT);

        match doc.query_first_within(element, banner_anchor) {
            Some(anchor) => doc.insert_after(anchor, banner),
            None => doc.prepend_child(element, banner),
        }
    }
}

/// Append the tag container. No-ops when a container is already present,
/// so a cycle can never stack duplicates.
fn append_tags(doc: &Document, element: NodeId, keywords: &[String]) {
    let tags_selector = Selector::Class(KEYWORD_TAGS_CLASS.to_string());
    if doc.query_first_within(element, &tags_selector).is_some() {
        return;
    }

    let container = doc.create_element("div");
    doc.add_class(container, KEYWORD_TAGS_CLASS);
    for keyword in keywords {
        let tag = doc.create_element("span");
        doc.set_text(tag, keyword);
        doc.append_child(container, tag);
    }
    doc.append_child(element, container);
}
