//! Declarative (CSS) queries, with scrapy-style `::text` and `::attr(name)`
//! suffixes for text and attribute extraction.

use scraper::{Html, Selector};

use crate::error::SelectorSyntaxError;
use crate::text::{collapse_whitespace, element_text};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Extract {
    /// Full element text, or its `content` attribute when the text is empty.
    ElementText,
    /// Direct text-node children only.
    OwnText,
    Attr(String),
}

#[derive(Debug)]
pub struct CompiledQuery {
    selector: Selector,
    extract: Extract,
}

pub fn compile(expression: &str) -> Result<CompiledQuery, SelectorSyntaxError> {
    let (css, extract) = split_pseudo_element(expression)?;
    let selector = Selector::parse(css)
        .map_err(|e| SelectorSyntaxError::new(expression, e.to_string()))?;
    Ok(CompiledQuery { selector, extract })
}

pub fn evaluate(document: &Html, expression: &str) -> Result<Vec<String>, SelectorSyntaxError> {
    let query = compile(expression)?;
    let mut fragments = Vec::new();

    for element in document.select(&query.selector) {
        match &query.extract {
            Extract::ElementText => {
                let text = element_text(&element);
                if !text.is_empty() {
                    fragments.push(text);
                } else if let Some(content) = element.value().attr("content") {
                    push_non_empty(&mut fragments, content);
                }
            }
            Extract::OwnText => {
                for child in element.children() {
                    if let Some(text) = child.value().as_text() {
                        push_non_empty(&mut fragments, text);
                    }
                }
            }
            Extract::Attr(name) => {
                if let Some(value) = element.value().attr(name) {
                    push_non_empty(&mut fragments, value);
                }
            }
        }
    }

    Ok(fragments)
}

fn push_non_empty(fragments: &mut Vec<String>, raw: &str) {
    let text = collapse_whitespace(raw);
    if !text.is_empty() {
        fragments.push(text);
    }
}

fn split_pseudo_element(expression: &str) -> Result<(&str, Extract), SelectorSyntaxError> {
    let Some(idx) = expression.rfind("::") else {
        return Ok((expression, Extract::ElementText));
    };

    let base = expression[..idx].trim();
    let pseudo = expression[idx + 2..].trim();
    if base.is_empty() {
        return Err(SelectorSyntaxError::new(
            expression,
            "pseudo-element without a selector",
        ));
    }

    if pseudo == "text" {
        return Ok((base, Extract::OwnText));
    }

    let attr = pseudo
        .strip_prefix("attr(")
        .and_then(|rest| rest.strip_suffix(')'))
        .map(str::trim)
        .filter(|name| !name.is_empty());

    match attr {
        Some(name) => Ok((base, Extract::Attr(name.to_string()))),
        None => Err(SelectorSyntaxError::new(
            expression,
            format!("unsupported pseudo-element '::{pseudo}'"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><head>
            <meta property="product:price:amount" content="24.90">
        </head><body>
            <div class="price">Now <b>$19.99</b></div>
            <a class="buy" data-price="19.99" href="/cart">Buy</a>
        </body></html>
    "#;

    #[test]
    fn element_text_includes_descendants() {
        let document = Html::parse_document(PAGE);
        assert_eq!(evaluate(&document, ".price").unwrap(), vec!["Now $19.99"]);
    }

    #[test]
    fn text_pseudo_element_takes_own_text_nodes() {
        let document = Html::parse_document(PAGE);
        assert_eq!(evaluate(&document, ".price::text").unwrap(), vec!["Now"]);
        assert_eq!(evaluate(&document, ".price b::text").unwrap(), vec!["$19.99"]);
    }

    #[test]
    fn attr_pseudo_element_reads_attributes() {
        let document = Html::parse_document(PAGE);
        assert_eq!(
            evaluate(&document, "a.buy::attr(data-price)").unwrap(),
            vec!["19.99"]
        );
        assert!(evaluate(&document, "a.buy::attr(title)").unwrap().is_empty());
    }

    #[test]
    fn empty_meta_falls_back_to_content() {
        let document = Html::parse_document(PAGE);
        assert_eq!(
            evaluate(&document, r#"meta[property="product:price:amount"]"#).unwrap(),
            vec!["24.90"]
        );
    }

    #[test]
    fn bad_pseudo_elements_are_syntax_errors() {
        let document = Html::parse_document(PAGE);
        assert!(evaluate(&document, ".price::before").is_err());
        assert!(evaluate(&document, "::text").is_err());
        assert!(evaluate(&document, ".price::attr()").is_err());
    }
}
