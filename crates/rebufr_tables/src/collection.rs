use std::collections::BTreeMap;

use crate::{Table, TableId, TableType};

/// All known tables, keyed by their composite identity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableCollection {
    tables: BTreeMap<TableId, Table>,
}

impl TableCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table. A table with the same identity already present absorbs
    /// the incoming entries instead of being replaced.
    pub fn insert(&mut self, table: Table) {
        match self.tables.entry(table.id()) {
            std::collections::btree_map::Entry::Occupied(mut slot) => {
                slot.get_mut().append_table(&table);
            }
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(table);
            }
        }
    }

    pub fn get(&self, id: &TableId) -> Option<&Table> {
        self.tables.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &TableId> {
        self.tables.keys()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// The highest version stored for `(table_type, master, center)`, if any.
    pub fn latest_version(
        &self,
        table_type: TableType,
        master_table: Option<u8>,
        originating_center: Option<u16>,
    ) -> Option<u8> {
        self.tables
            .values()
            .map(Table::id)
            .filter(|id| {
                id.table_type == table_type
                    && id.master_table == master_table
                    && id.originating_center == originating_center
            })
            .filter_map(|id| id.table_version)
            .max()
    }

    /// Synthesize the table "as of `version`" for one `(type, master,
    /// center)` line: every source table at `version` or newer contributes
    /// its entries, appended oldest first so that the newest definition of
    /// each identity masks the older ones.
    pub fn construct_table_version(
        &self,
        table_type: TableType,
        version: u8,
        master_table: Option<u8>,
        originating_center: Option<u16>,
    ) -> Table {
        let mut result = Table::new(TableId {
            table_type,
            master_table,
            originating_center,
            table_version: Some(version),
        });

        // BTreeMap iteration already yields matching tables in ascending
        // version order.
        for table in self.tables.values().filter(|t| {
            let id = t.id();
            id.table_type == table_type
                && id.master_table == master_table
                && id.originating_center == originating_center
                && id.table_version.is_some_and(|v| v >= version)
        }) {
            result.append_table(table);
        }

        result
    }

    /// The unconditional local-extension overlay for a base type: every
    /// `…X` table of that kind regardless of master or center, oldest first.
    fn extension_overlay(&self, table_type: TableType) -> impl Iterator<Item = &Table> {
        let ext = table_type.extension();
        self.tables
            .values()
            .filter(move |t| t.id().table_type == ext)
    }

    /// The composite a message decodes against: master entries at the master
    /// version, local-center entries at the local version on top, and the
    /// `…X` overlay last. Table A master entries are pinned at version 0.
    pub fn message_table(
        &self,
        table_type: TableType,
        master_table: u8,
        master_version: u8,
        originating_center: u16,
        local_version: u8,
    ) -> Table {
        let master_part_version = match table_type {
            TableType::A => 0,
            _ => master_version,
        };

        let mut result = Table::new(TableId::new(table_type));
        result.append_table(&self.construct_table_version(
            table_type,
            master_part_version,
            Some(master_table),
            None,
        ));
        result.append_table(&self.construct_table_version(
            table_type,
            local_version,
            Some(master_table),
            Some(originating_center),
        ));
        for overlay in self.extension_overlay(table_type) {
            result.append_table(overlay);
        }

        result
    }
}
