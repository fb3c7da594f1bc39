use rebufr_tables::{Descriptor, ElementDefinition, Table};

/// One step of the decode plan produced by [Expander::expand].
#[derive(Debug, Clone, PartialEq)]
pub enum PlanNode<'t> {
    /// Read one value for this Table B element.
    Element(&'t ElementDefinition),
    /// Repeat `body` a fixed number of times known from the descriptor list.
    FixedReplication {
        count: u8,
        body: Vec<PlanNode<'t>>,
    },
    /// Read `count_element` from the data section, then repeat `body` that
    /// many times.
    DelayedReplication {
        count_element: &'t ElementDefinition,
        body: Vec<PlanNode<'t>>,
    },
}

impl PlanNode<'_> {
    /// Leaves under this node for a single repetition (the delayed count
    /// element is not part of the body).
    pub fn leaf_count(&self) -> usize {
        match self {
            Self::Element(_) => 1,
            Self::FixedReplication { body, .. } | Self::DelayedReplication { body, .. } => {
                body.iter().map(Self::leaf_count).sum()
            }
        }
    }
}

/// Resolves a raw descriptor list against Tables B and D into a plan.
///
/// Expansion is pure: it consults the tables but never touches the data
/// section. Unresolvable element and sequence descriptors are tolerated
/// (local overlays may prune entries) and dropped from the plan with one
/// diagnostic per expansion; operator descriptors (F=2) are not interpreted
/// and are skipped the same way.
pub struct Expander<'t> {
    table_b: &'t Table,
    table_d: &'t Table,
    unknown_diagnosed: bool,
    operator_diagnosed: bool,
}

impl<'t> Expander<'t> {
    pub const fn new(table_b: &'t Table, table_d: &'t Table) -> Self {
        Self {
            table_b,
            table_d,
            unknown_diagnosed: false,
            operator_diagnosed: false,
        }
    }

    pub fn expand(&mut self, descriptors: &[Descriptor]) -> Vec<PlanNode<'t>> {
        let len = descriptors.len();
        let mut plan = Vec::new();
        let mut i = 0;

        while i < len {
            let d = descriptors[i];
            match d.f {
                0 => match self.table_b.element(d) {
                    Some(element) => plan.push(PlanNode::Element(element)),
                    None => self.note_unknown(d),
                },
                1 => {
                    let span = d.x as usize;
                    if d.y == 0 {
                        let count_end = (i + 2).min(len);
                        let body_end = (count_end + span).min(len);
                        let count_plan = self.expand(&descriptors[(i + 1).min(len)..count_end]);
                        let body = self.expand(&descriptors[count_end..body_end]);

                        match count_plan.into_iter().next() {
                            Some(PlanNode::Element(count_element)) => {
                                plan.push(PlanNode::DelayedReplication {
                                    count_element,
                                    body,
                                });
                            }
                            // no way to learn the repetition count
                            _ => self.note_unknown(d),
                        }
                        i += span + 1;
                    } else {
                        let body_end = (i + 1 + span).min(len);
                        let body = self.expand(&descriptors[(i + 1).min(len)..body_end]);
                        plan.push(PlanNode::FixedReplication { count: d.x, body });
                        i += span;
                    }
                }
                2 => self.note_operator(d),
                _ => match self.table_d.sequence(d) {
                    Some(sequence) => {
                        let children = sequence.descriptors();
                        let expanded = self.expand(&children);
                        plan.extend(expanded);
                    }
                    None => self.note_unknown(d),
                },
            }
            i += 1;
        }

        plan
    }

    fn note_unknown(&mut self, d: Descriptor) {
        if !self.unknown_diagnosed {
            tracing::debug!(descriptor = %d, "descriptor not in the active tables, skipping");
            self.unknown_diagnosed = true;
        }
    }

    fn note_operator(&mut self, d: Descriptor) {
        if !self.operator_diagnosed {
            tracing::warn!(descriptor = %d, "operator descriptors are not interpreted, skipping");
            self.operator_diagnosed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use rebufr_tables::{ElementDefinition, Entry, SequenceDefinition, SequenceElement, Table, TableId, TableType};

    use super::*;

    fn element(x: u8, y: u8, bit_width: u16) -> ElementDefinition {
        ElementDefinition {
            descriptor: Descriptor::new(0, x, y),
            scale: 0,
            reference_value: 0,
            bit_width,
            unit: "Numeric".to_owned(),
            mnemonic: None,
            desc_code: None,
            name: None,
        }
    }

    fn tables() -> (Table, Table) {
        let mut b = Table::new(TableId::new(TableType::B));
        b.append(Entry::Element(element(1, 1, 7)));
        b.append(Entry::Element(element(1, 2, 8)));
        b.append(Entry::Element(element(31, 1, 8)));
        b.append(Entry::Element(element(12, 101, 16)));

        let mut d = Table::new(TableId::new(TableType::D));
        let mut seq = SequenceDefinition::new(Descriptor::new(3, 1, 1));
        for (index, y) in [(0u8, 1u8), (1, 2)] {
            seq.push(SequenceElement {
                index,
                descriptor: Descriptor::new(0, 1, y),
                name: None,
            });
        }
        d.append(Entry::Sequence(seq));

        (b, d)
    }

    #[test]
    fn test_elements_expand_in_order() {
        let (b, d) = tables();
        let plan = Expander::new(&b, &d).expand(&[
            Descriptor::new(0, 1, 1),
            Descriptor::new(0, 12, 101),
        ]);

        let descriptors: Vec<_> = plan
            .iter()
            .filter_map(|n| match n {
                PlanNode::Element(e) => Some(e.descriptor),
                _ => None,
            })
            .collect();
        assert_eq!(
            descriptors,
            vec![Descriptor::new(0, 1, 1), Descriptor::new(0, 12, 101)]
        );
    }

    #[test]
    fn test_sequences_flatten_inline() {
        let (b, d) = tables();
        let plan = Expander::new(&b, &d).expand(&[
            Descriptor::new(3, 1, 1),
            Descriptor::new(0, 12, 101),
        ]);

        assert_eq!(plan.len(), 3);
        assert_eq!(plan.iter().map(PlanNode::leaf_count).sum::<usize>(), 3);
    }

    #[test]
    fn test_fixed_replication_wraps_following_descriptors() {
        let (b, d) = tables();
        let plan = Expander::new(&b, &d).expand(&[
            Descriptor::new(1, 1, 1),
            Descriptor::new(0, 1, 2),
        ]);

        assert_eq!(plan.len(), 1);
        let PlanNode::FixedReplication { count, body } = &plan[0] else {
            panic!("expected a fixed replication");
        };
        assert_eq!(*count, 1);
        assert_eq!(body.len(), 1);
        assert!(
            matches!(body[0], PlanNode::Element(e) if e.descriptor == Descriptor::new(0, 1, 2))
        );
    }

    #[test]
    fn test_delayed_replication_takes_count_element() {
        let (b, d) = tables();
        let plan = Expander::new(&b, &d).expand(&[
            Descriptor::new(1, 1, 0),
            Descriptor::new(0, 31, 1),
            Descriptor::new(0, 1, 2),
            Descriptor::new(0, 12, 101),
        ]);

        assert_eq!(plan.len(), 2);
        let PlanNode::DelayedReplication {
            count_element,
            body,
        } = &plan[0]
        else {
            panic!("expected a delayed replication");
        };
        assert_eq!(count_element.descriptor, Descriptor::new(0, 31, 1));
        assert_eq!(body.len(), 1);
        assert!(
            matches!(plan[1], PlanNode::Element(e) if e.descriptor == Descriptor::new(0, 12, 101))
        );
    }

    #[test]
    fn test_multi_descriptor_replication_body() {
        let (b, d) = tables();
        let plan = Expander::new(&b, &d).expand(&[
            Descriptor::new(1, 2, 5),
            Descriptor::new(0, 1, 1),
            Descriptor::new(0, 1, 2),
        ]);

        assert_eq!(plan.len(), 1);
        let PlanNode::FixedReplication { count, body } = &plan[0] else {
            panic!("expected a fixed replication");
        };
        assert_eq!(*count, 2);
        assert_eq!(body.len(), 2);
    }

    #[test]
    fn test_unknown_and_operator_descriptors_are_skipped() {
        let (b, d) = tables();
        let plan = Expander::new(&b, &d).expand(&[
            Descriptor::new(0, 63, 255),
            Descriptor::new(2, 1, 0),
            Descriptor::new(3, 63, 255),
            Descriptor::new(0, 1, 1),
        ]);

        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn test_one_leaf_per_resolvable_terminal() {
        let (b, d) = tables();
        // sequence (2 leaves) + fixed replication of 1 element + plain element
        let plan = Expander::new(&b, &d).expand(&[
            Descriptor::new(3, 1, 1),
            Descriptor::new(1, 1, 2),
            Descriptor::new(0, 1, 2),
            Descriptor::new(0, 12, 101),
        ]);

        let leaves: usize = plan.iter().map(PlanNode::leaf_count).sum();
        assert_eq!(leaves, 4);
    }
}
