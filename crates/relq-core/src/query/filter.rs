//! Predicate compiler.
//!
//! Checks a caller [`Filter`] against the registry and lowers it into a
//! [`PredicateNode`]. Every name, operator and operand is validated here, so
//! a compiled predicate never fails on shape at evaluation time.

use std::collections::HashSet;

use relq_proto::{Condition, Filter, JsonCondition, NullKind, QueryMode, RelationFilter, Value};

use super::predicate::{FieldTest, JsonTest, PredicateNode, Quantifier, RelationPredicate, TextOp};
use crate::catalog::{Cardinality, FieldKind, ScalarKind, SchemaRegistry};
use crate::error::{Error, Result};

/// Compiles filters over the models of a registry.
pub struct PredicateCompiler<'a> {
    registry: &'a SchemaRegistry,
}

impl<'a> PredicateCompiler<'a> {
    pub fn new(registry: &'a SchemaRegistry) -> Self {
        Self { registry }
    }

    /// Compile a filter over `model`.
    pub fn compile(&self, model: &str, filter: &Filter) -> Result<PredicateNode> {
        match filter {
            Filter::Field { field, conditions } => match self.registry.field_type(model, field)? {
                FieldKind::Scalar(descriptor) => compile_conditions(
                    &descriptor.name,
                    descriptor.kind,
                    descriptor.nullable,
                    conditions,
                ),
                FieldKind::Relation(_) => Err(Error::validation(format!(
                    "`{}.{}` is a relation; filter it with some/every/none/is/isNot",
                    model, field
                ))),
            },
            Filter::Relation { relation, filter } => self.compile_relation(model, relation, filter),
            Filter::And(filters) => Ok(PredicateNode::all(self.compile_all(model, filters)?)),
            Filter::Or(filters) => {
                let mut nodes = self.compile_all(model, filters)?;
                Ok(match nodes.len() {
                    0 => PredicateNode::Const(false),
                    1 => nodes.remove(0),
                    _ => PredicateNode::Or(nodes),
                })
            }
            Filter::Not(filters) => {
                let negated = self
                    .compile_all(model, filters)?
                    .into_iter()
                    .map(|node| PredicateNode::Not(Box::new(node)))
                    .collect();
                Ok(PredicateNode::all(negated))
            }
        }
    }

    /// Compile an optional filter.
    pub fn compile_optional(
        &self,
        model: &str,
        filter: Option<&Filter>,
    ) -> Result<Option<PredicateNode>> {
        filter.map(|f| self.compile(model, f)).transpose()
    }

    /// Compile a filter that must identify at most one record: its top-level
    /// equality conditions must cover every field of some unique key.
    pub fn compile_unique(&self, model: &str, filter: &Filter) -> Result<PredicateNode> {
        let descriptor = self.registry.describe(model)?;
        let mut fields = HashSet::new();
        collect_equalities(filter, &mut fields);

        let covered = descriptor
            .unique_keys()
            .iter()
            .any(|key| key.fields.iter().all(|f| fields.contains(f.as_str())));
        if !covered {
            let keys: Vec<String> = descriptor
                .unique_keys()
                .iter()
                .map(|k| format!("[{}]", k.fields.join(", ")))
                .collect();
            return Err(Error::validation(format!(
                "`where` on {} must match a unique key by equality, one of {}",
                model,
                keys.join(", ")
            )));
        }
        self.compile(model, filter)
    }

    fn compile_all(&self, model: &str, filters: &[Filter]) -> Result<Vec<PredicateNode>> {
        filters.iter().map(|f| self.compile(model, f)).collect()
    }

    fn compile_relation(
        &self,
        model: &str,
        relation: &str,
        filter: &RelationFilter,
    ) -> Result<PredicateNode> {
        let resolved = self.registry.relation(model, relation)?;
        let cardinality = resolved.descriptor.cardinality;
        let target = resolved.target.name.as_str();

        let (quantifier, nested) = match filter {
            RelationFilter::Some(f) => (Quantifier::Any, Some(f.as_ref())),
            RelationFilter::Every(f) => (Quantifier::All, Some(f.as_ref())),
            RelationFilter::None(f) => (Quantifier::None, Some(f.as_ref())),
            RelationFilter::Is(f) => (Quantifier::Is, f.as_deref()),
            RelationFilter::IsNot(f) => (Quantifier::IsNot, f.as_deref()),
            RelationFilter::Matches(f) if cardinality == Cardinality::Many => {
                (Quantifier::Any, Some(f.as_ref()))
            }
            RelationFilter::Matches(f) => (Quantifier::Is, Some(f.as_ref())),
        };

        let to_many = cardinality == Cardinality::Many;
        let fits = match quantifier {
            Quantifier::Any | Quantifier::All | Quantifier::None => to_many,
            Quantifier::Is | Quantifier::IsNot => !to_many,
        };
        if !fits {
            let hint = if to_many {
                "some, every or none"
            } else {
                "is or isNot"
            };
            return Err(Error::validation(format!(
                "relation `{}.{}` must be filtered with {}",
                model, relation, hint
            )));
        }

        let predicate = match nested {
            Some(f) => Some(Box::new(self.compile(target, f)?)),
            None => None,
        };
        Ok(PredicateNode::Relation(RelationPredicate {
            relation: relation.to_string(),
            target: target.to_string(),
            join: resolved.join.clone(),
            quantifier,
            predicate,
        }))
    }
}

fn collect_equalities<'f>(filter: &'f Filter, fields: &mut HashSet<&'f str>) {
    match filter {
        Filter::Field { field, conditions } => {
            let equal = conditions
                .iter()
                .any(|c| matches!(c, Condition::Equals(v) if !v.is_null()));
            if equal {
                fields.insert(field.as_str());
            }
        }
        Filter::And(filters) => {
            for f in filters {
                collect_equalities(f, fields);
            }
        }
        _ => {}
    }
}

/// Compile the conditions of one field. Also used for `having` clauses,
/// where `field` names an aggregate column.
pub fn compile_conditions(
    field: &str,
    kind: ScalarKind,
    nullable: bool,
    conditions: &[Condition],
) -> Result<PredicateNode> {
    let insensitive = conditions
        .iter()
        .any(|c| matches!(c, Condition::Mode(QueryMode::Insensitive)));
    if insensitive && !kind.is_string_like() {
        return Err(Error::validation(format!(
            "`mode` is only valid on String fields, `{}` is {}",
            field,
            kind.as_str()
        )));
    }
    let ctx = FieldContext {
        field,
        kind,
        nullable,
        insensitive,
    };

    let mut nodes = Vec::with_capacity(conditions.len());
    for condition in conditions {
        if let Some(node) = ctx.compile(condition)? {
            nodes.push(node);
        }
    }
    Ok(PredicateNode::all(nodes))
}

struct FieldContext<'a> {
    field: &'a str,
    kind: ScalarKind,
    nullable: bool,
    insensitive: bool,
}

impl FieldContext<'_> {
    fn node(&self, test: FieldTest) -> PredicateNode {
        PredicateNode::Field {
            field: self.field.to_string(),
            test,
        }
    }

    fn text(&self, op: TextOp, needle: &str) -> PredicateNode {
        self.node(FieldTest::Text {
            op,
            needle: needle.to_string(),
            insensitive: self.insensitive,
        })
    }

    fn invalid(&self, operator: &str) -> Error {
        Error::validation(format!(
            "operator `{}` is not valid on {} field `{}`",
            operator,
            self.kind.as_str(),
            self.field
        ))
    }

    /// Check a comparison operand and bring it into the field's representation.
    fn operand(&self, value: &Value) -> Result<Value> {
        if value.is_null() {
            return Err(Error::validation(format!(
                "null is not a valid operand for `{}`; use a null test",
                self.field
            )));
        }
        if !self.kind.accepts(value) {
            return Err(Error::validation(format!(
                "field `{}` expects {}, got {}",
                self.field,
                self.kind.as_str(),
                value.type_name()
            )));
        }
        Ok(self.kind.coerce(value.clone()))
    }

    fn operands(&self, values: &[Value]) -> Result<Vec<Value>> {
        values.iter().map(|v| self.operand(v)).collect()
    }

    fn check_null_test(&self, kind: NullKind) -> Result<()> {
        let allowed = match kind {
            NullKind::Db => self.nullable,
            NullKind::Json => self.kind == ScalarKind::Json,
            NullKind::Any => self.nullable || self.kind == ScalarKind::Json,
        };
        if allowed {
            Ok(())
        } else if kind == NullKind::Json {
            Err(Error::validation(format!(
                "JSON null test on non-JSON field `{}`",
                self.field
            )))
        } else {
            Err(Error::validation(format!(
                "null test on required field `{}`",
                self.field
            )))
        }
    }

    fn is_string(&self) -> bool {
        self.kind.is_string_like()
    }

    fn is_list_kind(&self) -> bool {
        matches!(self.kind, ScalarKind::Json | ScalarKind::StringList)
    }

    fn compile(&self, condition: &Condition) -> Result<Option<PredicateNode>> {
        let node = match condition {
            Condition::Mode(_) => return Ok(None),
            Condition::Equals(Value::Null) if self.kind == ScalarKind::Json => {
                return Err(Error::validation(format!(
                    "ambiguous null for JSON field `{}`; use DbNull, JsonNull or AnyNull",
                    self.field
                )))
            }
            Condition::Equals(Value::Null) => {
                self.check_null_test(NullKind::Db)?;
                self.node(FieldTest::Null(NullKind::Db))
            }
            Condition::Not(Value::Null) if self.kind == ScalarKind::Json => {
                return Err(Error::validation(format!(
                    "ambiguous null for JSON field `{}`; use DbNull, JsonNull or AnyNull",
                    self.field
                )))
            }
            Condition::Not(Value::Null) => {
                self.check_null_test(NullKind::Db)?;
                self.node(FieldTest::NotNull(NullKind::Db))
            }
            Condition::Equals(v) if self.is_string() && self.insensitive => {
                let v = self.operand(v)?;
                self.text(TextOp::Equals, v.as_str().unwrap_or_default())
            }
            Condition::Equals(v) => self.node(FieldTest::Eq(self.operand(v)?)),
            Condition::Not(v) if self.is_string() && self.insensitive => {
                let v = self.operand(v)?;
                self.text(TextOp::NotEquals, v.as_str().unwrap_or_default())
            }
            Condition::Not(v) => self.node(FieldTest::Ne(self.operand(v)?)),
            Condition::NotWith(nested) => {
                let mut inner = Vec::with_capacity(nested.len());
                for c in nested {
                    if let Some(node) = self.compile(c)? {
                        inner.push(node);
                    }
                }
                PredicateNode::Not(Box::new(PredicateNode::all(inner)))
            }
            Condition::In(_) | Condition::NotIn(_) if self.is_list_kind() => {
                return Err(self.invalid("in"))
            }
            Condition::In(values) if self.is_string() && self.insensitive => {
                let nodes = self
                    .operands(values)?
                    .iter()
                    .map(|v| self.text(TextOp::Equals, v.as_str().unwrap_or_default()))
                    .collect();
                PredicateNode::Or(nodes)
            }
            Condition::In(values) => self.node(FieldTest::In(self.operands(values)?)),
            Condition::NotIn(values) => self.node(FieldTest::NotIn(self.operands(values)?)),
            Condition::Lt(v) | Condition::Lte(v) | Condition::Gt(v) | Condition::Gte(v) => {
                if !self.kind.is_orderable() {
                    return Err(self.invalid("lt/lte/gt/gte"));
                }
                let v = self.operand(v)?;
                self.node(match condition {
                    Condition::Lt(_) => FieldTest::Lt(v),
                    Condition::Lte(_) => FieldTest::Lte(v),
                    Condition::Gt(_) => FieldTest::Gt(v),
                    _ => FieldTest::Gte(v),
                })
            }
            Condition::Contains(s) | Condition::StartsWith(s) | Condition::EndsWith(s) => {
                if !self.is_string() {
                    return Err(self.invalid("contains/startsWith/endsWith"));
                }
                let op = match condition {
                    Condition::Contains(_) => TextOp::Contains,
                    Condition::StartsWith(_) => TextOp::StartsWith,
                    _ => TextOp::EndsWith,
                };
                self.text(op, s)
            }
            Condition::IsNull(kind) => {
                self.check_null_test(*kind)?;
                self.node(FieldTest::Null(*kind))
            }
            Condition::IsNotNull(kind) => {
                self.check_null_test(*kind)?;
                self.node(FieldTest::NotNull(*kind))
            }
            Condition::Has(_) | Condition::HasEvery(_) | Condition::HasSome(_) | Condition::IsEmpty(_)
                if self.kind != ScalarKind::StringList =>
            {
                return Err(self.invalid("has/hasEvery/hasSome/isEmpty"))
            }
            Condition::Has(item) => self.node(FieldTest::Has(item.clone())),
            Condition::HasEvery(items) => self.node(FieldTest::HasEvery(items.clone())),
            Condition::HasSome(items) => self.node(FieldTest::HasSome(items.clone())),
            Condition::IsEmpty(empty) => self.node(FieldTest::IsEmpty(*empty)),
            Condition::Path { path, condition } => {
                if self.kind != ScalarKind::Json {
                    return Err(self.invalid("path"));
                }
                self.node(FieldTest::JsonPath {
                    path: path.clone(),
                    test: json_test(condition),
                })
            }
        };
        Ok(Some(node))
    }
}

fn json_test(condition: &JsonCondition) -> JsonTest {
    match condition {
        JsonCondition::Equals(v) => JsonTest::Equals(v.clone()),
        JsonCondition::StringContains(s) => JsonTest::Contains(s.clone()),
        JsonCondition::StringStartsWith(s) => JsonTest::StartsWith(s.clone()),
        JsonCondition::StringEndsWith(s) => JsonTest::EndsWith(s.clone()),
        JsonCondition::ArrayContains(v) => JsonTest::ArrayContains(v.clone()),
        JsonCondition::Lt(v) => JsonTest::Lt(v.clone()),
        JsonCondition::Lte(v) => JsonTest::Lte(v.clone()),
        JsonCondition::Gt(v) => JsonTest::Gt(v.clone()),
        JsonCondition::Gte(v) => JsonTest::Gte(v.clone()),
    }
}
