use std::collections::{HashMap, HashSet};

use rebufr_io::BitCursor;
use rebufr_tables::{CodeFlagDefinition, Descriptor, ElementDefinition, Table, UnitKind};

use crate::expand::PlanNode;
use crate::values::{
    CodeValue, FlagValue, MissingValue, NumericValue, RawBits, StringValue, Value,
};
use crate::Error;

/// One element of a decoded group: either a leaf value or a nested
/// replication.
#[derive(Debug, Clone, PartialEq)]
pub enum Node<'t> {
    Value(Value<'t>),
    Replication(Replication<'t>),
}

/// The values of one replication cycle (or of the whole subset at the top
/// level), in decode order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Group<'t> {
    nodes: Vec<Node<'t>>,
}

impl<'t> Group<'t> {
    pub fn nodes(&self) -> &[Node<'t>] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn collect_values<'a>(&'a self, out: &mut Vec<&'a Value<'t>>) {
        for node in &self.nodes {
            match node {
                Node::Value(value) => out.push(value),
                Node::Replication(replication) => {
                    for group in &replication.groups {
                        group.collect_values(out);
                    }
                }
            }
        }
    }
}

/// A decoded replication: `count` repetitions, one [Group] each. The count of
/// a delayed replication is read from the data section and is not part of the
/// groups.
#[derive(Debug, Clone, PartialEq)]
pub struct Replication<'t> {
    count: u64,
    groups: Vec<Group<'t>>,
}

impl<'t> Replication<'t> {
    pub const fn count(&self) -> u64 {
        self.count
    }

    pub fn groups(&self) -> &[Group<'t>] {
        &self.groups
    }
}

/// One subset's decoded value tree. Iteration yields leaf values in the exact
/// bit order they were read.
#[derive(Debug, Clone, PartialEq)]
pub struct Subset<'t> {
    root: Group<'t>,
}

impl<'t> Subset<'t> {
    pub const fn root(&self) -> &Group<'t> {
        &self.root
    }

    pub fn values(&self) -> impl Iterator<Item = &Value<'t>> {
        let mut out = Vec::new();
        self.root.collect_values(&mut out);
        out.into_iter()
    }
}

/// Walks a plan against the bit cursor, building one [Subset] per call.
///
/// Code- and flag-table selection is stateful: a `witnessed` map records the
/// most recent raw value of every element some conditional Table F entry
/// keys on, and each lookup prefers the conditional entry whose witness
/// matches, falling back to the unconditional one.
pub struct SubsetDecoder<'t> {
    table_f: &'t Table,
    witnesses: HashSet<Descriptor>,
    witnessed: HashMap<Descriptor, u64>,
}

impl<'t> SubsetDecoder<'t> {
    pub fn new(table_f: &'t Table) -> Self {
        let witnesses = table_f
            .entries()
            .filter_map(rebufr_tables::Entry::as_code_flag)
            .filter_map(|def| def.condition)
            .map(|condition| condition.descriptor)
            .collect();

        Self {
            table_f,
            witnesses,
            witnessed: HashMap::new(),
        }
    }

    /// Decode one subset. The cursor is left positioned on the first bit of
    /// the next subset.
    pub fn decode(
        &mut self,
        plan: &[PlanNode<'t>],
        cursor: &mut BitCursor<'_>,
    ) -> Result<Subset<'t>, Error> {
        self.witnessed.clear();
        let root = self.decode_group(plan, cursor)?;
        Ok(Subset { root })
    }

    fn decode_group(
        &mut self,
        plan: &[PlanNode<'t>],
        cursor: &mut BitCursor<'_>,
    ) -> Result<Group<'t>, Error> {
        let mut group = Group::default();

        for node in plan {
            match node {
                PlanNode::Element(element) => {
                    let value = self.decode_element(element, cursor)?;
                    group.nodes.push(Node::Value(value));
                }
                PlanNode::FixedReplication { count, body } => {
                    let replication = self.decode_replication(u64::from(*count), body, cursor)?;
                    group.nodes.push(Node::Replication(replication));
                }
                PlanNode::DelayedReplication {
                    count_element,
                    body,
                } => {
                    let count = self.decode_count(count_element, cursor)?;
                    let replication = self.decode_replication(count, body, cursor)?;
                    group.nodes.push(Node::Replication(replication));
                }
            }
        }

        Ok(group)
    }

    fn decode_replication(
        &mut self,
        count: u64,
        body: &[PlanNode<'t>],
        cursor: &mut BitCursor<'_>,
    ) -> Result<Replication<'t>, Error> {
        let mut groups = Vec::with_capacity(count as usize);
        for _ in 0..count {
            groups.push(self.decode_group(body, cursor)?);
        }
        Ok(Replication { count, groups })
    }

    fn decode_count(
        &mut self,
        count_element: &'t ElementDefinition,
        cursor: &mut BitCursor<'_>,
    ) -> Result<u64, Error> {
        let raw = cursor.read_bytes(count_element.bit_width)?;
        let raw = RawBits::new(raw, count_element.bit_width);
        if raw.is_missing() {
            tracing::debug!(
                descriptor = %count_element.descriptor,
                "missing replication count, emitting an empty replication"
            );
            return Ok(0);
        }

        let count = count_element.reference_value as i64 + raw.as_u64() as i64;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    fn decode_element(
        &mut self,
        element: &'t ElementDefinition,
        cursor: &mut BitCursor<'_>,
    ) -> Result<Value<'t>, Error> {
        let bytes = cursor.read_bytes(element.bit_width)?;
        let raw = RawBits::new(bytes, element.bit_width);

        // a later conditional lookup may key on this element
        if self.witnesses.contains(&element.descriptor) {
            self.witnessed.insert(element.descriptor, raw.as_u64());
        }

        if raw.is_missing() {
            return Ok(Value::Missing(MissingValue { element }));
        }

        Ok(match element.unit_kind() {
            UnitKind::CcittIa5 => Value::String(StringValue::new(element, raw)),
            UnitKind::CodeTable => {
                let table = self.resolve_code_flag(element.descriptor);
                Value::CodeLookup(CodeValue::new(element, raw, table))
            }
            UnitKind::FlagTable => {
                let table = self.resolve_code_flag(element.descriptor);
                Value::FlagLookup(FlagValue::new(element, raw, table))
            }
            UnitKind::Numeric => Value::Numeric(NumericValue::new(element, raw)),
        })
    }

    /// The Table F entry active for `descriptor`: a conditional entry whose
    /// witness value has been observed in this subset, else the unconditional
    /// entry, else nothing.
    fn resolve_code_flag(&self, descriptor: Descriptor) -> Option<&'t CodeFlagDefinition> {
        let mut unconditional = None;

        for def in self.table_f.code_flags_for(descriptor) {
            match def.condition {
                Some(condition) => {
                    let matched = self
                        .witnessed
                        .get(&condition.descriptor)
                        .is_some_and(|&w| u64::try_from(condition.value) == Ok(w));
                    if matched {
                        return Some(def);
                    }
                }
                None => unconditional = Some(def),
            }
        }

        unconditional
    }
}

#[cfg(test)]
mod tests {
    use rebufr_io::BitWriter;
    use rebufr_tables::{Condition, Entry, TableId, TableType};

    use crate::values::NumericData;

    use super::*;

    fn element(x: u8, y: u8, bit_width: u16, unit: &str) -> ElementDefinition {
        ElementDefinition {
            descriptor: Descriptor::new(0, x, y),
            scale: 0,
            reference_value: 0,
            bit_width,
            unit: unit.to_owned(),
            mnemonic: None,
            desc_code: None,
            name: None,
        }
    }

    fn empty_table_f() -> Table {
        Table::new(TableId::new(TableType::F))
    }

    fn numeric_data<'t>(subset: &Subset<'t>) -> Vec<Option<NumericData>> {
        subset
            .values()
            .map(|v| match v {
                Value::Numeric(n) => Some(n.data()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_plain_elements() -> Result<(), Error> {
        let table_f = empty_table_f();
        let el = element(1, 1, 7, "Numeric");
        let plan = vec![PlanNode::Element(&el), PlanNode::Element(&el)];

        let mut w = BitWriter::new();
        w.write(1, 7);
        w.write(33, 7);
        let payload = w.finish();

        let mut decoder = SubsetDecoder::new(&table_f);
        let subset = decoder.decode(&plan, &mut BitCursor::new(&payload))?;

        assert_eq!(
            numeric_data(&subset),
            vec![Some(NumericData::Int(1)), Some(NumericData::Int(33))]
        );
        Ok(())
    }

    #[test]
    fn test_missing_value() -> Result<(), Error> {
        let table_f = empty_table_f();
        let el = element(12, 101, 16, "K");
        let plan = vec![PlanNode::Element(&el)];

        let payload = [0xFF, 0xFF];
        let mut decoder = SubsetDecoder::new(&table_f);
        let subset = decoder.decode(&plan, &mut BitCursor::new(&payload))?;

        let values: Vec<_> = subset.values().collect();
        assert_eq!(values.len(), 1);
        assert!(values[0].is_missing());
        Ok(())
    }

    #[test]
    fn test_delayed_replication_reads_count() -> Result<(), Error> {
        let table_f = empty_table_f();
        let count_el = element(31, 1, 8, "Numeric");
        let body_el = element(1, 2, 8, "Numeric");
        let plan = vec![PlanNode::DelayedReplication {
            count_element: &count_el,
            body: vec![PlanNode::Element(&body_el)],
        }];

        let payload = [3u8, 10, 20, 30];
        let mut decoder = SubsetDecoder::new(&table_f);
        let subset = decoder.decode(&plan, &mut BitCursor::new(&payload))?;

        let root = subset.root().nodes();
        assert_eq!(root.len(), 1);
        let Node::Replication(replication) = &root[0] else {
            panic!("expected a replication");
        };
        assert_eq!(replication.count(), 3);
        assert_eq!(replication.groups().len(), 3);

        assert_eq!(
            numeric_data(&subset),
            vec![
                Some(NumericData::Int(10)),
                Some(NumericData::Int(20)),
                Some(NumericData::Int(30)),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_zero_count_yields_empty_replication() -> Result<(), Error> {
        let table_f = empty_table_f();
        let count_el = element(31, 1, 8, "Numeric");
        let body_el = element(1, 2, 8, "Numeric");
        let tail_el = element(1, 1, 7, "Numeric");
        let plan = vec![
            PlanNode::DelayedReplication {
                count_element: &count_el,
                body: vec![PlanNode::Element(&body_el)],
            },
            PlanNode::Element(&tail_el),
        ];

        let mut w = BitWriter::new();
        w.write(0, 8);
        w.write(5, 7);
        let payload = w.finish();

        let mut decoder = SubsetDecoder::new(&table_f);
        let subset = decoder.decode(&plan, &mut BitCursor::new(&payload))?;

        assert_eq!(numeric_data(&subset), vec![Some(NumericData::Int(5))]);
        Ok(())
    }

    #[test]
    fn test_short_payload_aborts() {
        let table_f = empty_table_f();
        let el = element(12, 101, 16, "K");
        let plan = vec![PlanNode::Element(&el)];

        let payload = [0xFF];
        let mut decoder = SubsetDecoder::new(&table_f);
        let result = decoder.decode(&plan, &mut BitCursor::new(&payload));
        assert!(matches!(result, Err(Error::Overrun(_))));
    }

    #[test]
    fn test_conditional_table_selection() -> Result<(), Error> {
        // 0-02-001 selects which meanings apply to 0-08-021
        let witness_el = element(2, 1, 8, rebufr_tables::UNIT_CODE_TABLE);
        let coded_el = element(8, 21, 8, rebufr_tables::UNIT_CODE_TABLE);

        let mut table_f = empty_table_f();
        let mut unconditional = CodeFlagDefinition::new(coded_el.descriptor, false, None);
        unconditional.insert_code(25, "Nominal reporting time");
        table_f.append(Entry::CodeFlag(unconditional));

        let mut conditional = CodeFlagDefinition::new(
            coded_el.descriptor,
            false,
            Some(Condition {
                descriptor: witness_el.descriptor,
                value: 1,
            }),
        );
        conditional.insert_code(25, "Time of launch");
        table_f.append(Entry::CodeFlag(conditional));

        let plan = vec![PlanNode::Element(&witness_el), PlanNode::Element(&coded_el)];

        // witness value 1: the conditional entry wins
        let payload = [1u8, 25];
        let mut decoder = SubsetDecoder::new(&table_f);
        let subset = decoder.decode(&plan, &mut BitCursor::new(&payload))?;
        let meanings: Vec<_> = subset
            .values()
            .filter_map(|v| match v {
                Value::CodeLookup(c) => Some(c.data()),
                _ => None,
            })
            .collect();
        assert_eq!(meanings[1], Some("Time of launch"));

        // witness value 2: fall back to the unconditional entry
        let payload = [2u8, 25];
        let subset = decoder.decode(&plan, &mut BitCursor::new(&payload))?;
        let meanings: Vec<_> = subset
            .values()
            .filter_map(|v| match v {
                Value::CodeLookup(c) => Some(c.data()),
                _ => None,
            })
            .collect();
        assert_eq!(meanings[1], Some("Nominal reporting time"));
        Ok(())
    }

    #[test]
    fn test_witness_state_resets_between_subsets() -> Result<(), Error> {
        let witness_el = element(2, 1, 8, "Numeric");
        let coded_el = element(8, 21, 8, rebufr_tables::UNIT_CODE_TABLE);

        let mut table_f = empty_table_f();
        let mut conditional = CodeFlagDefinition::new(
            coded_el.descriptor,
            false,
            Some(Condition {
                descriptor: witness_el.descriptor,
                value: 1,
            }),
        );
        conditional.insert_code(25, "Time of launch");
        table_f.append(Entry::CodeFlag(conditional));

        let mut decoder = SubsetDecoder::new(&table_f);

        let plan = vec![PlanNode::Element(&witness_el), PlanNode::Element(&coded_el)];
        let subset = decoder.decode(&plan, &mut BitCursor::new(&[1u8, 25]))?;
        let code_values: Vec<_> = subset
            .values()
            .filter_map(|v| match v {
                Value::CodeLookup(c) => Some(c.data()),
                _ => None,
            })
            .collect();
        assert_eq!(code_values, vec![Some("Time of launch")]);

        // second subset never sees the witness: no conditional match
        let plan = vec![PlanNode::Element(&coded_el)];
        let subset = decoder.decode(&plan, &mut BitCursor::new(&[25u8]))?;
        let code_values: Vec<_> = subset
            .values()
            .filter_map(|v| match v {
                Value::CodeLookup(c) => Some(c.data()),
                _ => None,
            })
            .collect();
        assert_eq!(code_values, vec![None]);
        Ok(())
    }

    #[test]
    fn test_fixed_replication_group_shape() -> Result<(), Error> {
        let table_f = empty_table_f();
        let el = element(1, 2, 8, "Numeric");
        let plan = vec![PlanNode::FixedReplication {
            count: 2,
            body: vec![PlanNode::Element(&el), PlanNode::Element(&el)],
        }];

        let payload = [1u8, 2, 3, 4];
        let mut decoder = SubsetDecoder::new(&table_f);
        let subset = decoder.decode(&plan, &mut BitCursor::new(&payload))?;

        let Node::Replication(replication) = &subset.root().nodes()[0] else {
            panic!("expected a replication");
        };
        assert_eq!(replication.groups().len(), 2);
        assert_eq!(replication.groups()[0].len(), 2);

        // leaf iteration preserves bit order across groups
        assert_eq!(
            numeric_data(&subset),
            vec![
                Some(NumericData::Int(1)),
                Some(NumericData::Int(2)),
                Some(NumericData::Int(3)),
                Some(NumericData::Int(4)),
            ]
        );
        Ok(())
    }
}
