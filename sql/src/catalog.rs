//! The catalog names every database, table, column and index the server
//! knows about. It holds no state of its own: every call borrows the
//! caller's [`kv::mvcc::Transaction`] for its duration, so catalog reads see
//! exactly what that transaction's snapshot sees, and catalog writes commit
//! or roll back with everything else the statement did.

use std::collections::Bound;

use serde_derive::{Deserialize, Serialize};

use kv::mvcc::Transaction;
use kv::storage::engine::Engine;

use crate::error::{Error, Result};
use crate::key::{self, catalog_tag};
use crate::types::{DataType, Value};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub datatype: DataType,
    pub nullable: bool,
    pub primary_key: bool,
    pub default: Option<Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub columns: Vec<Column>,
}

impl Schema {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn primary_key_indexes(&self) -> Vec<usize> {
        self.columns.iter().enumerate().filter(|(_, c)| c.primary_key).map(|(i, _)| i).collect()
    }

    pub fn primary_key(&self, row: &[Value]) -> Vec<Value> {
        self.primary_key_indexes().into_iter().map(|i| row[i].clone()).collect()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Index {
    pub id: u64,
    pub name: String,
    /// Indexes into the owning table's schema, in index-key order.
    pub columns: Vec<usize>,
    pub unique: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub id: u64,
    pub name: String,
    pub database: String,
    pub schema: Schema,
    pub indexes: Vec<Index>,
}

impl Table {
    pub fn index(&self, name: &str) -> Option<&Index> {
        self.indexes.iter().find(|i| i.name.eq_ignore_ascii_case(name))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Database {
    pub name: String,
}

/// A stateless handle bundling catalog operations with the transaction they
/// run under. Construct one per statement; it borrows the transaction, it
/// does not own one.
pub struct Catalog<'a, E: Engine> {
    txn: &'a Transaction<E>,
}

impl<'a, E: Engine> Catalog<'a, E> {
    pub fn new(txn: &'a Transaction<E>) -> Self {
        Catalog { txn }
    }

    fn database_key(name: &str) -> Vec<u8> {
        key::encode_catalog_key(catalog_tag::DATABASE, name.to_ascii_lowercase().as_bytes())
    }

    fn table_key(db: &str, table: &str) -> Vec<u8> {
        let mut name = db.to_ascii_lowercase();
        name.push('\u{0}');
        name.push_str(&table.to_ascii_lowercase());
        key::encode_catalog_key(catalog_tag::TABLE, name.as_bytes())
    }

    fn table_prefix(db: &str) -> Vec<u8> {
        let mut name = db.to_ascii_lowercase();
        name.push('\u{0}');
        key::encode_catalog_key(catalog_tag::TABLE, name.as_bytes())
    }

    pub fn create_database(&self, name: &str) -> Result<()> {
        let k = Self::database_key(name);
        if self.txn.get(&k)?.is_some() {
            return Err(Error::DatabaseExists(name.to_string()));
        }
        let db = Database { name: name.to_string() };
        self.txn.set(&k, bincode::serialize(&db)?)?;
        Ok(())
    }

    pub fn get_database(&self, name: &str) -> Result<Option<Database>> {
        match self.txn.get(&Self::database_key(name))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn must_get_database(&self, name: &str) -> Result<Database> {
        self.get_database(name)?.ok_or_else(|| Error::UnknownDatabase(name.to_string()))
    }

    pub fn list_databases(&self) -> Result<Vec<Database>> {
        let prefix = key::encode_catalog_key(catalog_tag::DATABASE, b"");
        // catalog_tag::DATABASE keys share the 2-byte (TAG_CATALOG, tag)
        // prefix; trim the terminator appended for an empty name so the
        // scan covers every database name.
        let prefix = prefix[..2].to_vec();
        let mut out = Vec::new();
        for item in self.txn.scan_prefix(&prefix)? {
            let (_, v) = item?;
            out.push(bincode::deserialize(&v)?);
        }
        out.sort_by(|a: &Database, b: &Database| a.name.cmp(&b.name));
        Ok(out)
    }

    pub fn drop_database(&self, name: &str, cascade: bool) -> Result<()> {
        self.must_get_database(name)?;
        let tables = self.list_tables(name)?;
        if !tables.is_empty() && !cascade {
            return Err(Error::ConstraintViolation(format!(
                "database '{}' is not empty",
                name
            )));
        }
        for table in tables {
            self.drop_table(name, &table.name)?;
        }
        self.txn.delete(&Self::database_key(name))?;
        Ok(())
    }

    fn next_id(&self, counter_tag: u8) -> Result<u64> {
        let k = key::encode_catalog_counter(counter_tag);
        let next = match self.txn.get(&k)? {
            Some(bytes) => bincode::deserialize::<u64>(&bytes)? + 1,
            None => 1,
        };
        self.txn.set(&k, bincode::serialize(&next)?)?;
        Ok(next)
    }

    pub fn create_table(&self, db: &str, name: &str, mut schema: Schema) -> Result<Table> {
        self.must_get_database(db)?;
        let k = Self::table_key(db, name);
        if self.txn.get(&k)?.is_some() {
            return Err(Error::TableExists(name.to_string()));
        }
        if schema.primary_key_indexes().is_empty() {
            schema.columns.insert(
                0,
                Column {
                    name: "_rowid".to_string(),
                    datatype: DataType::BigInt,
                    nullable: false,
                    primary_key: true,
                    default: None,
                },
            );
        }
        let id = self.next_id(catalog_tag::NEXT_TABLE_ID)?;
        let table =
            Table { id, name: name.to_string(), database: db.to_string(), schema, indexes: Vec::new() };
        self.txn.set(&k, bincode::serialize(&table)?)?;
        Ok(table)
    }

    pub fn get_table(&self, db: &str, name: &str) -> Result<Option<Table>> {
        match self.txn.get(&Self::table_key(db, name))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn must_get_table(&self, db: &str, name: &str) -> Result<Table> {
        self.get_table(db, name)?.ok_or_else(|| Error::UnknownTable(name.to_string()))
    }

    pub fn list_tables(&self, db: &str) -> Result<Vec<Table>> {
        let mut out = Vec::new();
        for item in self.txn.scan_prefix(&Self::table_prefix(db))? {
            let (_, v) = item?;
            out.push(bincode::deserialize(&v)?);
        }
        out.sort_by(|a: &Table, b: &Table| a.name.cmp(&b.name));
        Ok(out)
    }

    fn save_table(&self, table: &Table) -> Result<()> {
        self.txn.set(&Self::table_key(&table.database, &table.name), bincode::serialize(table)?)?;
        Ok(())
    }

    pub fn drop_table(&self, db: &str, name: &str) -> Result<()> {
        let table = self.must_get_table(db, name)?;
        let prefix = key::encode_row_prefix(table.id);
        let keys: Vec<Vec<u8>> =
            self.txn.scan_prefix(&prefix)?.map(|r| r.map(|(k, _)| k).map_err(Error::from)).collect::<Result<_>>()?;
        for k in keys {
            self.txn.delete(&k)?;
        }
        for index in &table.indexes {
            let iprefix = key::encode_index_prefix(index.id, &[]);
            let ikeys: Vec<Vec<u8>> =
                self.txn.scan_prefix(&iprefix)?.map(|r| r.map(|(k, _)| k).map_err(Error::from)).collect::<Result<_>>()?;
            for k in ikeys {
                self.txn.delete(&k)?;
            }
        }
        self.txn.delete(&Self::table_key(db, name))?;
        Ok(())
    }

    pub fn create_index(&self, db: &str, table_name: &str, name: &str, columns: &[String], unique: bool) -> Result<Index> {
        let mut table = self.must_get_table(db, table_name)?;
        if table.index(name).is_some() {
            return Err(Error::IndexExists(name.to_string()));
        }
        let mut col_idx = Vec::with_capacity(columns.len());
        for c in columns {
            col_idx.push(
                table
                    .schema
                    .column_index(c)
                    .ok_or_else(|| Error::UnknownColumn(c.clone()))?,
            );
        }
        let id = self.next_id(catalog_tag::NEXT_INDEX_ID)?;
        let index = Index { id, name: name.to_string(), columns: col_idx, unique };

        // Backfill: walk every existing row and add its index entry.
        let prefix = key::encode_row_prefix(table.id);
        for item in self.txn.scan_prefix(&prefix)? {
            let (row_key, row_bytes) = item?;
            let pk = decode_pk_suffix(&row_key, table.id)?;
            let row = crate::row::decode_row(&table.schema, &row_bytes)?;
            let key_tuple: Vec<Value> = index.columns.iter().map(|&i| row[i].clone()).collect();
            let ikey = key::encode_index_key(index.id, &key_tuple, &pk);
            self.txn.set(&ikey, vec![])?;
        }

        table.indexes.push(index.clone());
        self.save_table(&table)?;
        Ok(index)
    }

    pub fn drop_index(&self, db: &str, table_name: &str, name: &str) -> Result<()> {
        let mut table = self.must_get_table(db, table_name)?;
        let index = table.index(name).cloned().ok_or_else(|| Error::UnknownColumn(name.to_string()))?;
        let iprefix = key::encode_index_prefix(index.id, &[]);
        let keys: Vec<Vec<u8>> =
            self.txn.scan_prefix(&iprefix)?.map(|r| r.map(|(k, _)| k).map_err(Error::from)).collect::<Result<_>>()?;
        for k in keys {
            self.txn.delete(&k)?;
        }
        table.indexes.retain(|i| i.id != index.id);
        self.save_table(&table)?;
        Ok(())
    }

    /// Inserts or replaces a row, maintaining every secondary index.
    pub fn put_row(&self, table: &Table, row: &[Value]) -> Result<()> {
        let pk = table.schema.primary_key(row);
        let row_key = key::encode_row_key(table.id, &pk);
        if let Some(existing) = self.txn.get(&row_key)? {
            let old_row = crate::row::decode_row(&table.schema, &existing)?;
            for index in &table.indexes {
                let old_key_tuple: Vec<Value> = index.columns.iter().map(|&i| old_row[i].clone()).collect();
                self.txn.delete(&key::encode_index_key(index.id, &old_key_tuple, &pk))?;
            }
        }
        for index in &table.indexes {
            let key_tuple: Vec<Value> = index.columns.iter().map(|&i| row[i].clone()).collect();
            if index.unique {
                let probe = key::encode_index_prefix(index.id, &key_tuple);
                if let Some((existing_key, _)) = self.txn.scan_prefix(&probe)?.next().transpose()? {
                    let (_, existing_pk) = key::split_index_key(&existing_key, index.id, pk.len())?;
                    if existing_pk != pk {
                        return Err(Error::ConstraintViolation(format!(
                            "duplicate entry for unique index '{}'",
                            index.name
                        )));
                    }
                }
            }
            self.txn.set(&key::encode_index_key(index.id, &key_tuple, &pk), vec![])?;
        }
        self.txn.set(&row_key, crate::row::encode_row(&table.schema, row)?)?;
        Ok(())
    }

    pub fn delete_row(&self, table: &Table, pk: &[Value]) -> Result<()> {
        let row_key = key::encode_row_key(table.id, pk);
        if let Some(existing) = self.txn.get(&row_key)? {
            let old_row = crate::row::decode_row(&table.schema, &existing)?;
            for index in &table.indexes {
                let key_tuple: Vec<Value> = index.columns.iter().map(|&i| old_row[i].clone()).collect();
                self.txn.delete(&key::encode_index_key(index.id, &key_tuple, pk))?;
            }
        }
        self.txn.delete(&row_key)?;
        Ok(())
    }

    /// Looks up a single row by its primary key, for index lookups that
    /// already know the key and only need the row behind it.
    pub fn get_row(&self, table: &Table, pk: &[Value]) -> Result<Option<Vec<Value>>> {
        let row_key = key::encode_row_key(table.id, pk);
        match self.txn.get(&row_key)? {
            Some(bytes) => Ok(Some(crate::row::decode_row(&table.schema, &bytes)?)),
            None => Ok(None),
        }
    }

    /// Allocates the next value of a table's hidden `_rowid` auto-increment
    /// counter. Scoped by table id, not name, so it survives a rename and
    /// stays monotonic even if rows are deleted.
    pub fn next_row_id(&self, table: &Table) -> Result<i64> {
        let k = key::encode_row_id_counter(table.id);
        let next = match self.txn.get(&k)? {
            Some(bytes) => bincode::deserialize::<i64>(&bytes)? + 1,
            None => 1,
        };
        self.txn.set(&k, bincode::serialize(&next)?)?;
        Ok(next)
    }

    pub fn scan_table(&self, table: &Table) -> Result<Vec<(Vec<Value>, Vec<Value>)>> {
        let prefix = key::encode_row_prefix(table.id);
        let mut out = Vec::new();
        for item in self.txn.scan_prefix(&prefix)? {
            let (row_key, row_bytes) = item?;
            let pk = decode_pk_suffix(&row_key, table.id)?;
            let row = crate::row::decode_row(&table.schema, &row_bytes)?;
            out.push((pk, row));
        }
        Ok(out)
    }

    pub fn scan_index(&self, table: &Table, index: &Index, key_prefix: &[Value]) -> Result<Vec<Vec<Value>>> {
        let pk_arity = table.schema.primary_key_indexes().len();
        let prefix = key::encode_index_prefix(index.id, key_prefix);
        let mut out = Vec::new();
        for item in self.txn.scan_prefix(&prefix)? {
            let (ikey, _) = item?;
            let (_, pk) = key::split_index_key(&ikey, index.id, pk_arity)?;
            out.push(pk);
        }
        Ok(out)
    }

    /// Estimates row count via a full count scan; used by the optimizer's
    /// coarse join-order heuristic. Real deployments would keep running
    /// statistics instead of a linear scan.
    pub fn estimate_row_count(&self, table: &Table) -> Result<u64> {
        let prefix = key::encode_row_prefix(table.id);
        Ok(self.txn.scan_prefix(&prefix)?.count() as u64)
    }

    #[allow(dead_code)]
    fn unbounded_range() -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
        (Bound::Unbounded, Bound::Unbounded)
    }
}

fn decode_pk_suffix(row_key: &[u8], table_id: u64) -> Result<Vec<Value>> {
    let prefix = key::encode_row_prefix(table_id);
    let suffix = row_key.strip_prefix(prefix.as_slice()).ok_or_else(|| Error::Codec("row key prefix mismatch".into()))?;
    let mut values = Vec::new();
    let mut cursor = suffix;
    while !cursor.is_empty() {
        let (v, rest) = key::decode_value(cursor)?;
        values.push(v);
        cursor = rest;
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kv::mvcc::{MVCCDef, MVCC};
    use kv::storage::memory::Memory;

    fn schema() -> Schema {
        Schema {
            columns: vec![
                Column { name: "id".into(), datatype: DataType::Int, nullable: false, primary_key: true, default: None },
                Column { name: "name".into(), datatype: DataType::Text, nullable: true, primary_key: false, default: None },
            ],
        }
    }

    #[test]
    fn create_and_list_databases() {
        let mvcc = MVCC::new(Memory::new());
        let txn = mvcc.begin().unwrap();
        let cat = Catalog::new(&txn);
        cat.create_database("d").unwrap();
        assert_eq!(cat.list_databases().unwrap().len(), 1);
        assert!(cat.create_database("d").is_err());
    }

    #[test]
    fn row_put_get_and_index_maintenance() {
        let mvcc = MVCC::new(Memory::new());
        let txn = mvcc.begin().unwrap();
        let cat = Catalog::new(&txn);
        cat.create_database("d").unwrap();
        let table = cat.create_table("d", "t", schema()).unwrap();
        cat.put_row(&table, &[Value::Int(1), Value::Text("a".into())]).unwrap();
        cat.put_row(&table, &[Value::Int(2), Value::Text("b".into())]).unwrap();
        let rows = cat.scan_table(&table).unwrap();
        assert_eq!(rows.len(), 2);

        let index = cat.create_index("d", "t", "name_idx", &["name".to_string()], true).unwrap();
        let found = cat.scan_index(&table, &index, &[Value::Text("a".into())]).unwrap();
        assert_eq!(found, vec![vec![Value::Int(1)]]);
    }

    #[test]
    fn dropping_non_empty_database_requires_cascade() {
        let mvcc = MVCC::new(Memory::new());
        let txn = mvcc.begin().unwrap();
        let cat = Catalog::new(&txn);
        cat.create_database("d").unwrap();
        cat.create_table("d", "t", schema()).unwrap();
        assert!(cat.drop_database("d", false).is_err());
        assert!(cat.drop_database("d", true).is_ok());
    }

    #[test]
    fn row_id_counter_increments_per_table() {
        let mvcc = MVCC::new(Memory::new());
        let txn = mvcc.begin().unwrap();
        let cat = Catalog::new(&txn);
        cat.create_database("d").unwrap();
        let t1 = cat.create_table("d", "t1", schema()).unwrap();
        let t2 = cat.create_table("d", "t2", schema()).unwrap();
        assert_eq!(cat.next_row_id(&t1).unwrap(), 1);
        assert_eq!(cat.next_row_id(&t1).unwrap(), 2);
        assert_eq!(cat.next_row_id(&t2).unwrap(), 1);
    }

    #[test]
    fn get_row_reads_back_what_put_row_wrote() {
        let mvcc = MVCC::new(Memory::new());
        let txn = mvcc.begin().unwrap();
        let cat = Catalog::new(&txn);
        cat.create_database("d").unwrap();
        let table = cat.create_table("d", "t", schema()).unwrap();
        cat.put_row(&table, &[Value::Int(1), Value::Text("a".into())]).unwrap();
        assert_eq!(cat.get_row(&table, &[Value::Int(1)]).unwrap(), Some(vec![Value::Int(1), Value::Text("a".into())]));
        assert_eq!(cat.get_row(&table, &[Value::Int(2)]).unwrap(), None);
    }
}
