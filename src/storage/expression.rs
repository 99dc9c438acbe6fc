//! Structured update, condition, and key-condition expressions.
//!
//! Expressions are data first: the memory store evaluates them directly and
//! the DynamoDB backend renders them to expression syntax with placeholder
//! maps (`#n0 -> column`, `:v0 -> value`).

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use super::{AttributeValue, Item, StoreError};

/// Placeholder maps accumulated while rendering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpressionAttributes {
    pub names: HashMap<String, String>,
    pub values: HashMap<String, AttributeValue>,
    by_attribute: HashMap<String, String>,
}

impl ExpressionAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Placeholder for an attribute name, reused per attribute.
    pub fn name(&mut self, attribute: &str) -> String {
        if let Some(placeholder) = self.by_attribute.get(attribute) {
            return placeholder.clone();
        }
        let placeholder = format!("#n{}", self.names.len());
        self.names
            .insert(placeholder.clone(), attribute.to_string());
        self.by_attribute
            .insert(attribute.to_string(), placeholder.clone());
        placeholder
    }

    pub fn value(&mut self, value: AttributeValue) -> String {
        let placeholder = format!(":v{}", self.values.len());
        self.values.insert(placeholder.clone(), value);
        placeholder
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    Set(AttributeValue),
    /// Write only when the attribute is absent.
    SetIfNotExists(AttributeValue),
    /// Atomic add, treating an absent attribute as zero.
    Increment(i64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateAction {
    pub attribute: String,
    pub op: UpdateOp,
}

/// An ordered set of per-attribute writes; one action per attribute.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateExpression {
    actions: Vec<UpdateAction>,
}

impl UpdateExpression {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, attribute: impl Into<String>, value: AttributeValue) {
        self.push(attribute.into(), UpdateOp::Set(value));
    }

    pub fn set_if_not_exists(&mut self, attribute: impl Into<String>, value: AttributeValue) {
        self.push(attribute.into(), UpdateOp::SetIfNotExists(value));
    }

    pub fn increment(&mut self, attribute: impl Into<String>, by: i64) {
        self.push(attribute.into(), UpdateOp::Increment(by));
    }

    pub fn get(&self, attribute: &str) -> Option<&UpdateOp> {
        self.actions
            .iter()
            .find(|a| a.attribute == attribute)
            .map(|a| &a.op)
    }

    /// Drop and return the action for `attribute`.
    pub fn take(&mut self, attribute: &str) -> Option<UpdateOp> {
        let position = self.actions.iter().position(|a| a.attribute == attribute)?;
        Some(self.actions.remove(position).op)
    }

    pub fn actions(&self) -> &[UpdateAction] {
        &self.actions
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    fn push(&mut self, attribute: String, op: UpdateOp) {
        match self.actions.iter_mut().find(|a| a.attribute == attribute) {
            Some(existing) => existing.op = op,
            None => self.actions.push(UpdateAction { attribute, op }),
        }
    }

    /// `SET #n0 = :v0, #n1 = if_not_exists(#n1, :v1), #n2 = if_not_exists(#n2, :v2) + :v3`
    pub fn render(&self, attrs: &mut ExpressionAttributes) -> String {
        let clauses: Vec<String> = self
            .actions
            .iter()
            .map(|action| {
                let name = attrs.name(&action.attribute);
                match &action.op {
                    UpdateOp::Set(value) => {
                        format!("{} = {}", name, attrs.value(value.clone()))
                    }
                    UpdateOp::SetIfNotExists(value) => format!(
                        "{} = if_not_exists({}, {})",
                        name,
                        name,
                        attrs.value(value.clone())
                    ),
                    UpdateOp::Increment(by) => {
                        let zero = attrs.value(AttributeValue::number(0));
                        let delta = attrs.value(AttributeValue::number(*by));
                        format!("{} = if_not_exists({}, {}) + {}", name, name, zero, delta)
                    }
                }
            })
            .collect();
        format!("SET {}", clauses.join(", "))
    }

    /// Apply every action to `item` in place.
    pub fn apply(&self, item: &mut Item) -> Result<(), StoreError> {
        for action in &self.actions {
            match &action.op {
                UpdateOp::Set(value) => {
                    item.insert(action.attribute.clone(), value.clone());
                }
                UpdateOp::SetIfNotExists(value) => {
                    item.entry(action.attribute.clone())
                        .or_insert_with(|| value.clone());
                }
                UpdateOp::Increment(by) => {
                    let current = match item.get(&action.attribute) {
                        None => 0,
                        Some(existing) => existing.as_i64().ok_or_else(|| {
                            StoreError::Validation(format!(
                                "cannot increment non-integer attribute '{}'",
                                action.attribute
                            ))
                        })?,
                    };
                    item.insert(
                        action.attribute.clone(),
                        AttributeValue::number(current + by),
                    );
                }
            }
        }
        Ok(())
    }
}

/// Predicate over one item, used both as a write condition and as a query
/// filter.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Exists(String),
    NotExists(String),
    Equals(String, AttributeValue),
    And(Vec<Condition>),
    Or(Vec<Condition>),
}

impl Condition {
    pub fn equals(attribute: impl Into<String>, value: AttributeValue) -> Self {
        Self::Equals(attribute.into(), value)
    }

    pub fn and(self, other: Condition) -> Self {
        match self {
            Self::And(mut all) => {
                all.push(other);
                Self::And(all)
            }
            first => Self::And(vec![first, other]),
        }
    }

    pub fn render(&self, attrs: &mut ExpressionAttributes) -> String {
        match self {
            Self::Exists(attribute) => format!("attribute_exists({})", attrs.name(attribute)),
            Self::NotExists(attribute) => {
                format!("attribute_not_exists({})", attrs.name(attribute))
            }
            Self::Equals(attribute, value) => {
                let name = attrs.name(attribute);
                format!("{} = {}", name, attrs.value(value.clone()))
            }
            Self::And(all) => join(all, " AND ", attrs),
            Self::Or(any) => join(any, " OR ", attrs),
        }
    }

    /// Evaluate against the current item, `None` when the item is absent.
    pub fn evaluate(&self, item: Option<&Item>) -> bool {
        match self {
            Self::Exists(attribute) => item.is_some_and(|i| i.contains_key(attribute)),
            Self::NotExists(attribute) => !item.is_some_and(|i| i.contains_key(attribute)),
            Self::Equals(attribute, expected) => item
                .and_then(|i| i.get(attribute))
                .is_some_and(|actual| actual.matches(expected)),
            Self::And(all) => all.iter().all(|c| c.evaluate(item)),
            Self::Or(any) => any.iter().any(|c| c.evaluate(item)),
        }
    }
}

fn join(conditions: &[Condition], separator: &str, attrs: &mut ExpressionAttributes) -> String {
    let rendered: Vec<String> = conditions.iter().map(|c| c.render(attrs)).collect();
    format!("({})", rendered.join(separator))
}

/// Comparison applied to the sort key of a query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOperator {
    #[default]
    BeginsWith,
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl fmt::Display for SortOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Self::BeginsWith => "begins_with",
            Self::Eq => "=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        };
        f.write_str(symbol)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortCondition {
    pub attribute: String,
    pub operator: SortOperator,
    pub value: AttributeValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeyCondition {
    pub partition_attribute: String,
    pub partition_value: AttributeValue,
    pub sort: Option<SortCondition>,
}

impl KeyCondition {
    pub fn partition(attribute: impl Into<String>, value: AttributeValue) -> Self {
        Self {
            partition_attribute: attribute.into(),
            partition_value: value,
            sort: None,
        }
    }

    pub fn with_sort(
        mut self,
        attribute: impl Into<String>,
        operator: SortOperator,
        value: AttributeValue,
    ) -> Self {
        self.sort = Some(SortCondition {
            attribute: attribute.into(),
            operator,
            value,
        });
        self
    }

    pub fn render(&self, attrs: &mut ExpressionAttributes) -> String {
        let name = attrs.name(&self.partition_attribute);
        let mut expression = format!(
            "{} = {}",
            name,
            attrs.value(self.partition_value.clone())
        );
        if let Some(sort) = &self.sort {
            let name = attrs.name(&sort.attribute);
            let value = attrs.value(sort.value.clone());
            let clause = match sort.operator {
                SortOperator::BeginsWith => format!("begins_with({}, {})", name, value),
                op => format!("{} {} {}", name, op, value),
            };
            expression.push_str(" AND ");
            expression.push_str(&clause);
        }
        expression
    }

    pub fn matches(&self, item: &Item) -> bool {
        let partition_matches = item
            .get(&self.partition_attribute)
            .is_some_and(|v| v.matches(&self.partition_value));
        if !partition_matches {
            return false;
        }
        let Some(sort) = &self.sort else {
            return true;
        };
        let Some(actual) = item.get(&sort.attribute) else {
            return false;
        };
        match sort.operator {
            SortOperator::BeginsWith => match (actual, &sort.value) {
                (AttributeValue::S(a), AttributeValue::S(prefix)) => a.starts_with(prefix.as_str()),
                _ => false,
            },
            op => actual
                .compare(&sort.value)
                .is_some_and(|ordering| match op {
                    SortOperator::Eq => ordering == Ordering::Equal,
                    SortOperator::Lt => ordering == Ordering::Less,
                    SortOperator::Le => ordering != Ordering::Greater,
                    SortOperator::Gt => ordering == Ordering::Greater,
                    SortOperator::Ge => ordering != Ordering::Less,
                    SortOperator::BeginsWith => false,
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(pairs: &[(&str, AttributeValue)]) -> Item {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_render_update() {
        let mut update = UpdateExpression::new();
        update.set("plan", AttributeValue::string("ENTERPRISE"));
        update.set_if_not_exists("_ct", AttributeValue::string("2024-01-01T00:00:00.000Z"));
        update.increment("_v", 1);

        let mut attrs = ExpressionAttributes::new();
        let rendered = update.render(&mut attrs);
        assert_eq!(
            rendered,
            "SET #n0 = :v0, #n1 = if_not_exists(#n1, :v1), #n2 = if_not_exists(#n2, :v2) + :v3"
        );
        assert_eq!(attrs.names["#n2"], "_v");
        assert_eq!(attrs.values[":v3"], AttributeValue::number(1));
    }

    #[test]
    fn test_set_replaces_earlier_action() {
        let mut update = UpdateExpression::new();
        update.set("a", AttributeValue::number(1));
        update.increment("a", 2);
        assert_eq!(update.actions().len(), 1);
        assert_eq!(update.get("a"), Some(&UpdateOp::Increment(2)));
    }

    #[test]
    fn test_apply_update() {
        let mut update = UpdateExpression::new();
        update.set_if_not_exists("_ct", AttributeValue::string("first"));
        update.increment("_v", 1);

        let mut stored = item(&[]);
        update.apply(&mut stored).unwrap();
        assert_eq!(stored["_v"], AttributeValue::number(1));

        let mut again = UpdateExpression::new();
        again.set_if_not_exists("_ct", AttributeValue::string("second"));
        again.increment("_v", 1);
        again.apply(&mut stored).unwrap();
        assert_eq!(stored["_ct"], AttributeValue::string("first"));
        assert_eq!(stored["_v"], AttributeValue::number(2));

        let mut bad = UpdateExpression::new();
        bad.increment("_ct", 1);
        assert!(matches!(bad.apply(&mut stored), Err(StoreError::Validation(_))));
    }

    #[test]
    fn test_condition_render_and_evaluate() {
        let condition = Condition::Exists("pk".to_string())
            .and(Condition::equals("_v", AttributeValue::number(3)));
        let mut attrs = ExpressionAttributes::new();
        assert_eq!(
            condition.render(&mut attrs),
            "(attribute_exists(#n0) AND #n1 = :v0)"
        );

        let stored = item(&[("pk", AttributeValue::string("A")), ("_v", AttributeValue::number(3))]);
        assert!(condition.evaluate(Some(&stored)));
        assert!(!condition.evaluate(None));
        assert!(Condition::NotExists("pk".to_string()).evaluate(None));

        let either = Condition::Or(vec![
            Condition::equals("_v", AttributeValue::number(1)),
            Condition::equals("_v", AttributeValue::number(3)),
        ]);
        assert!(either.evaluate(Some(&stored)));
    }

    #[test]
    fn test_key_condition() {
        let condition = KeyCondition::partition("pk", AttributeValue::string("ACCOUNT#1"))
            .with_sort("sk", SortOperator::BeginsWith, AttributeValue::string("SUB"));
        let mut attrs = ExpressionAttributes::new();
        assert_eq!(
            condition.render(&mut attrs),
            "#n0 = :v0 AND begins_with(#n1, :v1)"
        );

        let hit = item(&[
            ("pk", AttributeValue::string("ACCOUNT#1")),
            ("sk", AttributeValue::string("SUBSCRIPTION#2024")),
        ]);
        let miss = item(&[
            ("pk", AttributeValue::string("ACCOUNT#1")),
            ("sk", AttributeValue::string("SUMMARY")),
        ]);
        assert!(condition.matches(&hit));
        assert!(!condition.matches(&miss));

        let ranged = KeyCondition::partition("pk", AttributeValue::string("ACCOUNT#1"))
            .with_sort("sk", SortOperator::Ge, AttributeValue::string("SUMMARY"));
        assert!(ranged.matches(&miss));
        assert!(!ranged.matches(&hit));
    }
}
