pub mod ledger_entries;

pub use ledger_entries as ledger_entry_entity;
