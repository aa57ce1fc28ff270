//! Structural expression templates and their process-wide cache.
//!
//! A template is deduced from the first row that needed a full expression
//! parse: the literal leaves of the parsed cell become numbered slots and
//! the remaining tokens become a fixed skeleton. Later rows that share the
//! skeleton are read by matching tokens and extracting slot literals — no
//! grammar parse at all — and their values are materialized in one batch
//! when the chunk ends or a row breaks the shape.
//!
//! Templates are immutable once built and shared through [`TemplateCache`],
//! keyed by target column type, null-as-default flag, skeleton shape, and
//! the trailing delimiter (interior and last columns differ). Construction
//! is idempotent, so concurrent readers racing on one key at worst build a
//! duplicate that loses the insert.

use std::sync::{Arc, RwLock};

use arrow::datatypes::Field;
use rowval_eval::{evaluate, parse_number_scalar, slotify};
use rowval_result::{Error, Result};
use rowval_scalar::{Scalar, coerce_scalar, default_scalar, replace_null_fields_with_defaults};
use rustc_hash::FxHashMap;
use sqlparser::ast::Expr;
use sqlparser::tokenizer::{Token, TokenWithSpan};

use crate::missing::MissingValues;
use crate::tokens::RowTokens;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum SlotKind {
    Number,
    String,
}

/// Hashable skeleton shape used in cache keys. Fixed tokens are keyed by
/// their rendered text, which is canonical for the tokenizer's output.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum SkeletonPart {
    Fixed(String),
    Slot(SlotKind),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct TemplateKey {
    type_repr: String,
    null_as_default: bool,
    skeleton: Vec<SkeletonPart>,
    delimiter: u8,
}

impl TemplateKey {
    pub fn new(
        field: &Field,
        null_as_default: bool,
        skeleton: Vec<SkeletonPart>,
        delimiter: u8,
    ) -> Self {
        TemplateKey {
            type_repr: format!("{:?}/{}", field.data_type(), field.is_nullable()),
            null_as_default,
            skeleton,
            delimiter,
        }
    }
}

/// The shape of one skeleton, as matched against live token streams.
enum SkeletonTok {
    Fixed(Token),
    Slot(SlotKind),
}

/// Summarize an expression's tokens as skeleton parts for cache lookup.
/// Numbers and single-quoted strings are slots; everything else is fixed.
pub(crate) fn skeleton_parts(tokens: &[TokenWithSpan]) -> Vec<SkeletonPart> {
    let mut parts = Vec::with_capacity(tokens.len());
    for token in tokens {
        match &token.token {
            Token::Whitespace(_) => {}
            Token::Number(_, _) => parts.push(SkeletonPart::Slot(SlotKind::Number)),
            Token::SingleQuotedString(_) => parts.push(SkeletonPart::Slot(SlotKind::String)),
            other => parts.push(SkeletonPart::Fixed(other.to_string())),
        }
    }
    parts
}

pub(crate) struct ExpressionTemplate {
    skeleton: Vec<SkeletonTok>,
    ast: Expr,
    slot_count: usize,
    delimiter: u8,
}

impl ExpressionTemplate {
    /// Deduce a template from a seed cell: its tokens (delimiter excluded)
    /// and its parsed expression. Returns `None` when the shape cannot be
    /// templated — unsupported node kinds, or literal tokens that do not
    /// line up one-to-one with the expression's literal leaves.
    pub fn deduce(
        expr_tokens: &[TokenWithSpan],
        ast: &Expr,
        delimiter: u8,
    ) -> Result<Option<ExpressionTemplate>> {
        let mut templated = ast.clone();
        let slot_count = match slotify(&mut templated) {
            Ok(count) => count,
            Err(_) => return Ok(None),
        };

        let mut skeleton = Vec::with_capacity(expr_tokens.len());
        let mut literal_tokens = 0usize;
        for token in expr_tokens {
            match &token.token {
                Token::Whitespace(_) => {}
                Token::Number(_, _) => {
                    skeleton.push(SkeletonTok::Slot(SlotKind::Number));
                    literal_tokens += 1;
                }
                Token::SingleQuotedString(_) => {
                    skeleton.push(SkeletonTok::Slot(SlotKind::String));
                    literal_tokens += 1;
                }
                other => skeleton.push(SkeletonTok::Fixed(other.clone())),
            }
        }
        if literal_tokens != slot_count {
            // A literal the tokenizer sees but the slot rewrite does not
            // (or vice versa) would bind slots to the wrong leaves.
            return Ok(None);
        }

        Ok(Some(ExpressionTemplate { skeleton, ast: templated, slot_count, delimiter }))
    }

    /// Match the skeleton against a row's tokens starting at `from`,
    /// extracting slot values and consuming the trailing delimiter. Returns
    /// the slot binding and the index one past the last consumed token.
    pub fn match_row(&self, row: &RowTokens, from: usize) -> Option<(Vec<Scalar>, usize)> {
        let tokens = row.tokens();
        let mut idx = from;
        let mut slots = Vec::with_capacity(self.slot_count);

        let next_significant = |mut i: usize| -> Option<usize> {
            while let Some(t) = tokens.get(i) {
                if matches!(t.token, Token::Whitespace(_)) {
                    i += 1;
                } else {
                    return Some(i);
                }
            }
            None
        };

        for part in &self.skeleton {
            idx = next_significant(idx)?;
            match (part, &tokens[idx].token) {
                (SkeletonTok::Fixed(expected), actual) if expected == actual => {}
                (SkeletonTok::Slot(SlotKind::Number), Token::Number(text, _)) => {
                    slots.push(parse_number_scalar(text).ok()?);
                }
                (SkeletonTok::Slot(SlotKind::String), Token::SingleQuotedString(text)) => {
                    slots.push(Scalar::Utf8(text.clone()));
                }
                _ => return None,
            }
            idx += 1;
        }

        idx = next_significant(idx)?;
        if self.delimiter == b',' {
            if tokens[idx].token != Token::Comma {
                return None;
            }
            idx += 1;
        } else {
            if tokens[idx].token == Token::Comma {
                idx = next_significant(idx + 1)?;
            }
            if tokens[idx].token != Token::RParen {
                return None;
            }
            idx += 1;
        }
        Some((slots, idx))
    }
}

/// Per-column buffer of rows read through one template.
pub(crate) struct TemplateState {
    pub template: Arc<ExpressionTemplate>,
    pub rows: Vec<Vec<Scalar>>,
}

impl TemplateState {
    pub fn new(template: Arc<ExpressionTemplate>) -> Self {
        TemplateState { template, rows: Vec::new() }
    }

    pub fn rows_count(&self) -> usize {
        self.rows.len()
    }

    /// Evaluate every buffered row into the column, marking defaulted nulls
    /// in the missing bitmap. The caller clears `rows` afterwards.
    pub fn evaluate_all(
        &self,
        field: &Field,
        null_as_default: bool,
        column: &mut Vec<Scalar>,
        missing: &mut MissingValues,
        column_index: usize,
    ) -> Result<()> {
        for slots in &self.rows {
            let mut value = evaluate(&self.template.ast, slots)?;
            if null_as_default {
                replace_null_fields_with_defaults(&mut value, field)?;
            }
            let value = coerce_scalar(value, field)?;
            if value.is_null() && !field.is_nullable() {
                if null_as_default {
                    missing.set(column_index, column.len());
                    column.push(default_scalar(field)?);
                    continue;
                }
                return Err(Error::TypeMismatch(format!(
                    "cannot insert NULL value into a column of type {:?}",
                    field.data_type()
                )));
            }
            column.push(value);
        }
        Ok(())
    }
}

/// Shared, injectable template cache. Clones share one underlying map, so a
/// splitter can hand the same handle to every reader it spawns while tests
/// construct isolated caches.
#[derive(Clone, Default)]
pub struct TemplateCache {
    inner: Arc<RwLock<FxHashMap<TemplateKey, Arc<ExpressionTemplate>>>>,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct compiled templates.
    pub fn len(&self) -> usize {
        self.inner.read().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up a template, deducing and inserting it on a miss. The boolean
    /// reports whether the template came from the cache.
    pub(crate) fn get_or_deduce(
        &self,
        key: TemplateKey,
        deduce: impl FnOnce() -> Result<Option<ExpressionTemplate>>,
    ) -> Result<Option<(Arc<ExpressionTemplate>, bool)>> {
        {
            let map = self
                .inner
                .read()
                .map_err(|_| Error::Internal("template cache lock is poisoned".into()))?;
            if let Some(template) = map.get(&key) {
                return Ok(Some((Arc::clone(template), true)));
            }
        }
        let Some(template) = deduce()? else {
            return Ok(None);
        };
        let template = Arc::new(template);
        let mut map = self
            .inner
            .write()
            .map_err(|_| Error::Internal("template cache lock is poisoned".into()))?;
        let entry = map.entry(key).or_insert_with(|| Arc::clone(&template));
        Ok(Some((Arc::clone(entry), false)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowval_eval::{ExprReader, tokenize_expr_text};

    fn seed(text: &str) -> (Vec<TokenWithSpan>, Expr) {
        let tokens = tokenize_expr_text(text).unwrap();
        let expr = ExprReader::new(tokens.clone(), 50).parse_expr().unwrap();
        (tokens, expr)
    }

    #[test]
    fn deduces_and_rematches_the_seed_shape() {
        let (tokens, expr) = seed("2 + 2");
        let template = ExpressionTemplate::deduce(&tokens, &expr, b',')
            .unwrap()
            .expect("templatable");
        assert_eq!(template.slot_count, 2);

        let row = RowTokens::tokenize(0, "3 + 4, 'rest'".to_string()).unwrap();
        let (slots, next) = template.match_row(&row, 0).expect("matches");
        assert_eq!(slots, vec![Scalar::Int64(3), Scalar::Int64(4)]);
        // The comma delimiter was consumed.
        assert!(matches!(row.tokens()[next - 1].token, Token::Comma));
    }

    #[test]
    fn shape_breaks_do_not_match() {
        let (tokens, expr) = seed("2 + 2");
        let template = ExpressionTemplate::deduce(&tokens, &expr, b',')
            .unwrap()
            .unwrap();
        let row = RowTokens::tokenize(0, "3 * 4, 1".to_string()).unwrap();
        assert!(template.match_row(&row, 0).is_none());
        let row = RowTokens::tokenize(0, "'x' + 1, 1".to_string()).unwrap();
        assert!(template.match_row(&row, 0).is_none());
    }

    #[test]
    fn last_column_allows_a_trailing_comma() {
        let (tokens, expr) = seed("1 + 1");
        let template = ExpressionTemplate::deduce(&tokens, &expr, b')')
            .unwrap()
            .unwrap();
        let row = RowTokens::tokenize(0, "5 + 6 , )".to_string()).unwrap();
        let (slots, _) = template.match_row(&row, 0).expect("matches");
        assert_eq!(slots, vec![Scalar::Int64(5), Scalar::Int64(6)]);
    }

    #[test]
    fn identifiers_are_not_templatable() {
        let (tokens, expr) = seed("a + 1");
        assert!(ExpressionTemplate::deduce(&tokens, &expr, b',').unwrap().is_none());
    }

    #[test]
    fn cache_returns_the_same_template_for_one_shape() {
        let cache = TemplateCache::new();
        let field = Field::new("v", arrow::datatypes::DataType::Int64, false);
        let (tokens, expr) = seed("2 + 2");
        let make_key =
            || TemplateKey::new(&field, false, skeleton_parts(&tokens), b',');

        let (first, cached) = cache
            .get_or_deduce(make_key(), || ExpressionTemplate::deduce(&tokens, &expr, b','))
            .unwrap()
            .unwrap();
        assert!(!cached);
        let (second, cached) = cache
            .get_or_deduce(make_key(), || ExpressionTemplate::deduce(&tokens, &expr, b','))
            .unwrap()
            .unwrap();
        assert!(cached);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn evaluate_all_materializes_buffered_rows() {
        let field = Field::new("v", arrow::datatypes::DataType::Int64, false);
        let (tokens, expr) = seed("2 + 2");
        let template =
            Arc::new(ExpressionTemplate::deduce(&tokens, &expr, b',').unwrap().unwrap());
        let mut state = TemplateState::new(template);
        state.rows.push(vec![Scalar::Int64(2), Scalar::Int64(2)]);
        state.rows.push(vec![Scalar::Int64(3), Scalar::Int64(3)]);

        let mut column = Vec::new();
        let mut missing = MissingValues::new(1);
        state
            .evaluate_all(&field, false, &mut column, &mut missing, 0)
            .unwrap();
        assert_eq!(column, vec![Scalar::Int64(4), Scalar::Int64(6)]);
        assert!(!missing.has_missing());
    }
}
