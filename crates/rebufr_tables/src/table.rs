use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::entities::{eq_ci, Descriptor, ElementDefinition, Entry, EntryId, SequenceDefinition};
use crate::{CodeFlagDefinition, Error};

/// Table kinds. The `…X` kinds are local extensions overlaid unconditionally
/// on top of the versioned composites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TableType {
    A,
    B,
    D,
    F,
    AX,
    BX,
    DX,
    FX,
}

impl TableType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::D => "D",
            Self::F => "F",
            Self::AX => "AX",
            Self::BX => "BX",
            Self::DX => "DX",
            Self::FX => "FX",
        }
    }

    /// The local-extension sibling of a base type (`B` → `BX`). Extension
    /// types return themselves.
    pub const fn extension(self) -> Self {
        match self {
            Self::A | Self::AX => Self::AX,
            Self::B | Self::BX => Self::BX,
            Self::D | Self::DX => Self::DX,
            Self::F | Self::FX => Self::FX,
        }
    }

    pub const fn is_extension(self) -> bool {
        matches!(self, Self::AX | Self::BX | Self::DX | Self::FX)
    }
}

impl fmt::Display for TableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TableType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(Self::A),
            "B" => Ok(Self::B),
            "D" => Ok(Self::D),
            "F" => Ok(Self::F),
            "AX" => Ok(Self::AX),
            "BX" => Ok(Self::BX),
            "DX" => Ok(Self::DX),
            "FX" => Ok(Self::FX),
            other => Err(Error::UnknownTableType(other.to_owned())),
        }
    }
}

/// Composite identity of a table: kind, master table, originating center and
/// version. `None` fields mean the table is not pinned to that axis (synthetic
/// composites and local extensions leave them unset).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableId {
    pub table_type: TableType,
    pub master_table: Option<u8>,
    pub originating_center: Option<u16>,
    pub table_version: Option<u8>,
}

impl TableId {
    pub const fn new(table_type: TableType) -> Self {
        Self {
            table_type,
            master_table: None,
            originating_center: None,
            table_version: None,
        }
    }

    pub const fn with_master(mut self, master_table: u8) -> Self {
        self.master_table = Some(master_table);
        self
    }

    pub const fn with_center(mut self, originating_center: u16) -> Self {
        self.originating_center = Some(originating_center);
        self
    }

    pub const fn with_version(mut self, table_version: u8) -> Self {
        self.table_version = Some(table_version);
        self
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.table_type)?;
        for field in [
            self.master_table.map(u32::from),
            self.originating_center.map(u32::from),
            self.table_version.map(u32::from),
        ] {
            if let Some(v) = field {
                write!(f, "_{v}")?;
            }
        }
        Ok(())
    }
}

/// A mapping from entry identity to entry, iterated in identity order.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    id: TableId,
    entries: BTreeMap<EntryId, Entry>,
}

impl Table {
    pub const fn new(id: TableId) -> Self {
        Self {
            id,
            entries: BTreeMap::new(),
        }
    }

    pub const fn id(&self) -> TableId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert an entry. On identity collision, container entries absorb the
    /// incoming children and leaf entries are replaced, so appending the same
    /// source twice is a no-op and later sources mask earlier ones.
    pub fn append(&mut self, entry: Entry) {
        match self.entries.entry(entry.id()) {
            std::collections::btree_map::Entry::Occupied(mut slot) => slot.get_mut().merge(entry),
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(entry);
            }
        }
    }

    /// Append every entry of `other`, leaving `other` intact.
    pub fn append_table(&mut self, other: &Self) {
        for entry in other.entries.values() {
            self.append(entry.clone());
        }
    }

    pub fn get(&self, id: &EntryId) -> Option<&Entry> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &EntryId) -> bool {
        self.entries.contains_key(id)
    }

    /// Table B convenience lookup.
    pub fn element(&self, descriptor: Descriptor) -> Option<&ElementDefinition> {
        self.entries
            .get(&EntryId::Element { descriptor })
            .and_then(Entry::as_element)
    }

    /// Table D convenience lookup.
    pub fn sequence(&self, descriptor: Descriptor) -> Option<&SequenceDefinition> {
        self.entries
            .get(&EntryId::Sequence { descriptor })
            .and_then(Entry::as_sequence)
    }

    /// Table A convenience lookup.
    pub fn category(&self, code: u16) -> Option<&str> {
        self.entries
            .get(&EntryId::Category { code })
            .and_then(Entry::as_category)
            .map(|c| c.description.as_str())
    }

    /// All Table F definitions for one descriptor, unconditional and
    /// conditional alike, in identity order.
    pub fn code_flags_for(
        &self,
        descriptor: Descriptor,
    ) -> impl Iterator<Item = &CodeFlagDefinition> {
        self.entries
            .values()
            .filter_map(Entry::as_code_flag)
            .filter(move |c| c.descriptor == descriptor)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EntryId, &Entry)> {
        self.entries.iter()
    }

    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values()
    }

    /// Shallow subtable of the entries whose identity satisfies `pred`. The
    /// result keeps this table's own identity.
    pub fn find(&self, pred: impl Fn(&EntryId) -> bool) -> Self {
        let entries = self
            .entries
            .iter()
            .filter(|(id, _)| pred(id))
            .map(|(id, entry)| (*id, entry.clone()))
            .collect();
        Self {
            id: self.id,
            entries,
        }
    }

    /// The `n`-th entry in identity order.
    pub fn iloc(&self, n: usize) -> Option<&Entry> {
        self.entries.values().nth(n)
    }

    /// Entries present in `other` but missing from `self`. Leaf entries count
    /// as missing when any of their meaningful fields differ (informational
    /// fields — names, description codes — are ignored, strings compare
    /// case-insensitively). Container entries present on both sides
    /// contribute a container holding only the child-level differences.
    ///
    /// The result has `other`'s identity, and appending it to `self`
    /// reconstructs `other` up to informational fields.
    pub fn diff(&self, other: &Self) -> Self {
        let mut result = Self::new(other.id);

        for entry in other.entries.values() {
            match self.entries.get(&entry.id()) {
                None => result.append(entry.clone()),
                Some(mine) => {
                    if let Some(delta) = diff_entry(mine, entry) {
                        result.append(delta);
                    }
                }
            }
        }

        result
    }
}

/// Per-entry difference for entries sharing an identity; `None` means no
/// difference worth reporting.
fn diff_entry(mine: &Entry, theirs: &Entry) -> Option<Entry> {
    match (mine, theirs) {
        (Entry::Category(a), Entry::Category(b)) => (!a.matches(b)).then(|| theirs.clone()),
        (Entry::Element(a), Entry::Element(b)) => (!a.matches(b)).then(|| theirs.clone()),
        (Entry::Sequence(a), Entry::Sequence(b)) => {
            if !a.header_matches(b) {
                return Some(theirs.clone());
            }
            let mut delta = SequenceDefinition::new(a.descriptor);
            delta.mnemonic.clone_from(&a.mnemonic);
            delta.dcod.clone_from(&a.dcod);
            delta.name.clone_from(&a.name);
            for child in b.elements() {
                if a.element_at(child.index).is_none_or(|c| !c.matches(child)) {
                    delta.push(child.clone());
                }
            }
            (!delta.is_empty()).then_some(Entry::Sequence(delta))
        }
        (Entry::CodeFlag(a), Entry::CodeFlag(b)) => {
            if !a.header_matches(b) {
                return Some(theirs.clone());
            }
            let mut delta = CodeFlagDefinition::new(a.descriptor, a.is_flag, a.condition);
            delta.mnemonic.clone_from(&a.mnemonic);
            for (code, meaning) in b.codes() {
                if !a.meaning(code).is_some_and(|m| eq_ci(Some(m), Some(meaning))) {
                    delta.insert_code(code, meaning);
                }
            }
            (!delta.is_empty()).then_some(Entry::CodeFlag(delta))
        }
        // identities matched, so the kinds cannot disagree
        _ => Some(theirs.clone()),
    }
}

#[cfg(test)]
mod tests {
    use crate::entities::SequenceElement;

    use super::*;

    fn element(x: u8, y: u8, bit_width: u16) -> Entry {
        Entry::Element(ElementDefinition {
            descriptor: Descriptor::new(0, x, y),
            scale: 0,
            reference_value: 0,
            bit_width,
            unit: "Numeric".to_owned(),
            mnemonic: Some(format!("EL{x:02}{y:03}")),
            desc_code: None,
            name: None,
        })
    }

    fn table_b() -> Table {
        Table::new(TableId::new(TableType::B).with_master(0).with_version(36))
    }

    #[test]
    fn test_append_replaces_on_collision() {
        let mut t = table_b();
        t.append(element(1, 1, 7));
        t.append(element(1, 1, 9));

        assert_eq!(t.len(), 1);
        let width = t.element(Descriptor::new(0, 1, 1)).map(|e| e.bit_width);
        assert_eq!(width, Some(9));
    }

    #[test]
    fn test_append_is_idempotent() {
        let mut t = table_b();
        t.append(element(1, 1, 7));
        t.append(element(1, 2, 10));

        let mut seq = SequenceDefinition::new(Descriptor::new(3, 1, 1));
        seq.push(SequenceElement {
            index: 0,
            descriptor: Descriptor::new(0, 1, 1),
            name: None,
        });
        t.append(Entry::Sequence(seq));

        let before = t.clone();
        let copy = t.clone();
        t.append_table(&copy);
        assert_eq!(t, before);
    }

    #[test]
    fn test_find_keeps_identity() {
        let mut t = table_b();
        t.append(element(1, 1, 7));
        t.append(element(2, 1, 8));

        let sub = t.find(|id| matches!(id, EntryId::Element { descriptor } if descriptor.x == 1));
        assert_eq!(sub.id(), t.id());
        assert_eq!(sub.len(), 1);
    }

    #[test]
    fn test_iloc_in_identity_order() {
        let mut t = table_b();
        t.append(element(2, 1, 8));
        t.append(element(1, 1, 7));
        t.append(element(1, 2, 10));

        let d = |n: usize| {
            t.iloc(n)
                .and_then(Entry::as_element)
                .map(|e| e.descriptor)
        };
        assert_eq!(d(0), Some(Descriptor::new(0, 1, 1)));
        assert_eq!(d(1), Some(Descriptor::new(0, 1, 2)));
        assert_eq!(d(2), Some(Descriptor::new(0, 2, 1)));
        assert_eq!(t.iloc(3), None);
    }

    #[test]
    fn test_diff_reports_new_and_changed_entries() {
        let mut a = table_b();
        a.append(element(1, 1, 7));
        a.append(element(1, 2, 10));

        let mut b = table_b();
        b.append(element(1, 1, 7)); // unchanged
        b.append(element(1, 2, 12)); // changed width
        b.append(element(1, 3, 4)); // new

        let delta = a.diff(&b);
        assert_eq!(delta.len(), 2);
        assert!(delta.get(&element(1, 2, 12).id()).is_some());
        assert!(delta.get(&element(1, 3, 4).id()).is_some());
    }

    #[test]
    fn test_diff_ignores_informational_fields() {
        let mut a = table_b();
        a.append(element(1, 1, 7));

        let mut renamed = element(1, 1, 7);
        if let Entry::Element(e) = &mut renamed {
            e.name = Some("WMO BLOCK NUMBER".to_owned());
            e.desc_code = Some("0;1;1".to_owned());
        }
        let mut b = table_b();
        b.append(renamed);

        assert!(a.diff(&b).is_empty());
    }

    #[test]
    fn test_diff_containers_at_child_level() {
        let d = Descriptor::new(0, 2, 1);
        let mut cf_a = CodeFlagDefinition::new(d, false, None);
        cf_a.insert_code(0, "calm");
        cf_a.insert_code(1, "light air");

        let mut cf_b = CodeFlagDefinition::new(d, false, None);
        cf_b.insert_code(0, "CALM"); // case-only change: not a difference
        cf_b.insert_code(2, "light breeze");

        let mut a = Table::new(TableId::new(TableType::F));
        a.append(Entry::CodeFlag(cf_a));
        let mut b = Table::new(TableId::new(TableType::F));
        b.append(Entry::CodeFlag(cf_b));

        let delta = a.diff(&b);
        assert_eq!(delta.len(), 1);
        let rows: Vec<_> = delta
            .entries()
            .filter_map(Entry::as_code_flag)
            .flat_map(|c| c.codes().collect::<Vec<_>>())
            .collect();
        assert_eq!(rows, vec![(2, "light breeze")]);
    }

    #[test]
    fn test_diff_then_append_reconstructs() {
        let mut a = table_b();
        a.append(element(1, 1, 7));
        a.append(element(1, 2, 10));

        let mut b = table_b();
        b.append(element(1, 1, 7));
        b.append(element(1, 2, 12));
        b.append(element(2, 1, 8));

        let delta = a.diff(&b);
        let mut patched = a.clone();
        patched.append_table(&delta);

        // b's entries all present and semantically equal after patching
        for entry in b.entries() {
            let mine = patched.get(&entry.id());
            assert!(mine.is_some_and(|m| diff_entry(m, entry).is_none()));
        }
    }
}
