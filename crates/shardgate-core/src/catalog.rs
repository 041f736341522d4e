use crate::error::ShardgateError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// A logical table the proxy distributes across data nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableRule {
    pub name: String,
    pub data_nodes: Vec<String>,
}

/// A logical schema. `default_data_node` is the physical node that answers
/// statements touching no configured table, including introspection.
#[derive(Debug, Clone, Default)]
pub struct SchemaDescriptor {
    pub name: String,
    pub default_data_node: Option<String>,
    tables: BTreeMap<String, TableRule>,
}

impl SchemaDescriptor {
    pub fn new(name: impl Into<String>, default_data_node: Option<String>) -> Self {
        Self {
            name: name.into(),
            default_data_node: default_data_node.filter(|node| !node.is_empty()),
            tables: BTreeMap::new(),
        }
    }

    /// Table names are stored upper-cased; lookups are case-insensitive.
    pub fn add_table(&mut self, mut rule: TableRule) -> Result<(), ShardgateError> {
        let key = rule.name.to_uppercase();
        if self.tables.contains_key(&key) {
            return Err(ShardgateError::Catalog(format!(
                "table already exists in schema {}: {}",
                self.name, rule.name
            )));
        }
        rule.name = key.clone();
        self.tables.insert(key, rule);
        Ok(())
    }

    pub fn has_default_data_node(&self) -> bool {
        self.default_data_node.is_some()
    }

    pub fn get_table(&self, name: &str) -> Option<&TableRule> {
        self.tables.get(&name.to_uppercase())
    }

    /// Upper-cased table names in sorted order.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }
}

#[derive(Debug, Default, Clone)]
pub struct SchemaCatalog {
    schemas: HashMap<String, SchemaDescriptor>,
}

impl SchemaCatalog {
    pub fn new() -> Self {
        Self {
            schemas: HashMap::new(),
        }
    }

    pub fn add_schema(&mut self, schema: SchemaDescriptor) -> Result<(), ShardgateError> {
        if self.schemas.contains_key(&schema.name) {
            return Err(ShardgateError::Catalog(format!(
                "schema already exists: {}",
                schema.name
            )));
        }
        self.schemas.insert(schema.name.clone(), schema);
        Ok(())
    }

    pub fn get_schema(&self, name: &str) -> Option<&SchemaDescriptor> {
        self.schemas.get(name)
    }

    pub fn schema_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.schemas.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
