// Copyright 2022 SphereEx Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


mod encryptor;

use indexmap::IndexMap;

pub use self::encryptor::Encryptor;
use crate::{
    config::{ConfigError, EncryptConfig},
    statement::{ColumnSegment, StatementContext},
    value::SqlValue,
};

/// Physical column a predicate on an encrypted column reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryColumn {
    AssistedQuery,
    Cipher,
    Plain,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncryptColumn {
    pub logic_column: String,
    pub cipher_column: String,
    pub assisted_query_column: Option<String>,
    pub plain_column: Option<String>,
    pub encryptor: String,
}

impl EncryptColumn {
    /// Assisted query column, else cipher. Plaintext queries need the plain column.
    pub fn query_column(&self, query_with_cipher_column: bool) -> Option<(QueryColumn, &str)> {
        if query_with_cipher_column {
            Some(match &self.assisted_query_column {
                Some(column) => (QueryColumn::AssistedQuery, column.as_str()),
                None => (QueryColumn::Cipher, self.cipher_column.as_str()),
            })
        } else {
            self.plain_column.as_deref().map(|c| (QueryColumn::Plain, c))
        }
    }

    pub fn projection_column(&self, query_with_cipher_column: bool) -> &str {
        match &self.plain_column {
            Some(plain) if !query_with_cipher_column => plain,
            _ => &self.cipher_column,
        }
    }

    /// Columns written next to the cipher column, in write order.
    pub fn derived_columns(&self) -> Vec<(QueryColumn, &str)> {
        let mut columns = vec![];
        if let Some(assisted) = &self.assisted_query_column {
            columns.push((QueryColumn::AssistedQuery, assisted.as_str()));
        }
        if let Some(plain) = &self.plain_column {
            columns.push((QueryColumn::Plain, plain.as_str()));
        }
        columns
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncryptTable {
    pub name: String,
    /// Keyed by lower-cased logic column.
    columns: IndexMap<String, EncryptColumn>,
}

impl EncryptTable {
    pub fn find_column(&self, logic_column: &str) -> Option<&EncryptColumn> {
        self.columns.get(&logic_column.to_ascii_lowercase())
    }

    pub fn columns(&self) -> impl Iterator<Item = &EncryptColumn> {
        self.columns.values()
    }

    pub fn is_cipher_column(&self, column: &str) -> bool {
        self.columns.values().any(|c| c.cipher_column.eq_ignore_ascii_case(column))
    }
}

/// Column encryption rule, immutable once built.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EncryptRule {
    encryptors: IndexMap<String, Encryptor>,
    tables: IndexMap<String, EncryptTable>,
}

impl TryFrom<&EncryptConfig> for EncryptRule {
    type Error = ConfigError;

    fn try_from(config: &EncryptConfig) -> Result<Self, Self::Error> {
        EncryptRule::new(config)
    }
}

impl EncryptRule {
    pub fn new(config: &EncryptConfig) -> Result<Self, ConfigError> {
        let mut encryptors = IndexMap::new();
        for item in config.encryptors.iter() {
            let encryptor = Encryptor::new(item.encryptor_type, item.key.as_deref())
                .ok_or_else(|| ConfigError::EncryptorKeyRequired(item.name.clone()))?;
            encryptors.insert(item.name.clone(), encryptor);
        }

        let mut tables = IndexMap::new();
        for table in config.tables.iter() {
            let mut columns = IndexMap::new();
            for column in table.columns.iter() {
                if !encryptors.contains_key(&column.encryptor) {
                    return Err(ConfigError::UnknownEncryptor(column.encryptor.clone()));
                }
                columns.insert(
                    column.logic_column.to_ascii_lowercase(),
                    EncryptColumn {
                        logic_column: column.logic_column.clone(),
                        cipher_column: column.cipher_column.clone(),
                        assisted_query_column: column.assisted_query_column.clone(),
                        plain_column: column.plain_column.clone(),
                        encryptor: column.encryptor.clone(),
                    },
                );
            }
            tables.insert(
                table.name.to_ascii_lowercase(),
                EncryptTable { name: table.name.clone(), columns },
            );
        }

        Ok(EncryptRule { encryptors, tables })
    }

    /// Plaintext queries need a plain column for every encrypted column.
    pub fn check_plain_columns(&self) -> Result<(), ConfigError> {
        for table in self.tables.values() {
            if let Some(column) = table.columns().find(|c| c.plain_column.is_none()) {
                return Err(ConfigError::PlainColumnRequired(
                    table.name.clone(),
                    column.logic_column.clone(),
                ));
            }
        }
        Ok(())
    }

    pub fn find_table(&self, table: &str) -> Option<&EncryptTable> {
        self.tables.get(&table.to_ascii_lowercase())
    }

    pub fn find_column(&self, table: &str, logic_column: &str) -> Option<&EncryptColumn> {
        self.find_table(table).and_then(|t| t.find_column(logic_column))
    }

    pub fn is_encrypt_table(&self, table: &str) -> bool {
        self.find_table(table).is_some()
    }

    pub fn find_encryptor(&self, table: &str, logic_column: &str) -> Option<&Encryptor> {
        self.find_column(table, logic_column).and_then(|c| self.encryptors.get(&c.encryptor))
    }

    /// Cipher value of `plain`. `None` when the column is not encrypted.
    pub fn encrypt(&self, table: &str, logic_column: &str, plain: &SqlValue) -> Option<SqlValue> {
        self.find_encryptor(table, logic_column).map(|e| e.encrypt(plain))
    }

    /// Value stored in, or compared against, the `kind` column.
    pub fn column_value(
        &self,
        table: &str,
        logic_column: &str,
        kind: QueryColumn,
        plain: &SqlValue,
    ) -> SqlValue {
        let encrypted = match kind {
            QueryColumn::AssistedQuery => self.encrypt_assisted(table, logic_column, plain),
            QueryColumn::Cipher => self.encrypt(table, logic_column, plain),
            QueryColumn::Plain => None,
        };
        encrypted.unwrap_or_else(|| plain.clone())
    }

    /// Encrypted column referenced by `column` among the statement's tables,
    /// with the logical table name.
    pub fn find_statement_column<'a>(
        &'a self,
        stmt: &StatementContext,
        column: &ColumnSegment,
    ) -> Option<(String, &'a EncryptColumn)> {
        match &column.owner {
            Some(owner) => {
                let table = stmt.find_table(Some(owner))?;
                self.find_column(&table.name, &column.name).map(|c| (table.name.clone(), c))
            }
            None => stmt.tables.iter().find_map(|t| {
                self.find_column(&t.name, &column.name).map(|c| (t.name.clone(), c))
            }),
        }
    }

    pub fn encrypt_assisted(
        &self,
        table: &str,
        logic_column: &str,
        plain: &SqlValue,
    ) -> Option<SqlValue> {
        self.find_encryptor(table, logic_column).map(|e| e.encrypt_assisted(plain))
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::config::{EncryptColumnConfig, EncryptTableConfig, EncryptorConfig, EncryptorType};

    /// `t_user.pwd` with sha1, `t_user.phone` with rc4, assisted query and plain columns.
    pub fn user_encrypt_config() -> EncryptConfig {
        EncryptConfig {
            encryptors: vec![
                EncryptorConfig {
                    name: "digest".to_string(),
                    encryptor_type: EncryptorType::Sha1,
                    key: None,
                },
                EncryptorConfig {
                    name: "stream".to_string(),
                    encryptor_type: EncryptorType::Rc4,
                    key: Some("Key".to_string()),
                },
            ],
            tables: vec![EncryptTableConfig {
                name: "t_user".to_string(),
                columns: vec![
                    EncryptColumnConfig {
                        logic_column: "pwd".to_string(),
                        cipher_column: "pwd_cipher".to_string(),
                        assisted_query_column: None,
                        plain_column: None,
                        encryptor: "digest".to_string(),
                    },
                    EncryptColumnConfig {
                        logic_column: "phone".to_string(),
                        cipher_column: "phone_cipher".to_string(),
                        assisted_query_column: Some("phone_assisted".to_string()),
                        plain_column: Some("phone_plain".to_string()),
                        encryptor: "stream".to_string(),
                    },
                ],
            }],
        }
    }

    pub fn user_encrypt_rule() -> EncryptRule {
        EncryptRule::new(&user_encrypt_config()).unwrap()
    }

    #[test]
    fn test_build_rule() {
        let rule = user_encrypt_rule();
        assert!(rule.is_encrypt_table("T_USER"));
        assert_eq!(rule.find_column("t_user", "PWD").unwrap().cipher_column, "pwd_cipher");
        assert!(rule.find_table("t_user").unwrap().is_cipher_column("phone_cipher"));
        assert_eq!(
            rule.encrypt("t_user", "pwd", &SqlValue::Int(1)),
            Some(SqlValue::from("356a192b7913b04c54574d18c28d46e6395428ab"))
        );
        assert_eq!(rule.encrypt("t_user", "name", &SqlValue::Int(1)), None);

        let phone = rule.find_column("t_user", "phone").unwrap();
        assert_eq!(phone.query_column(true), Some((QueryColumn::AssistedQuery, "phone_assisted")));
        assert_eq!(phone.query_column(false), Some((QueryColumn::Plain, "phone_plain")));
        assert_eq!(phone.projection_column(false), "phone_plain");
        let pwd = rule.find_column("t_user", "pwd").unwrap();
        assert_eq!(pwd.query_column(false), None);
        assert_eq!(pwd.projection_column(false), "pwd_cipher");
        assert!(matches!(
            rule.check_plain_columns(),
            Err(ConfigError::PlainColumnRequired(table, column)) if table == "t_user" && column == "pwd"
        ));
    }

    #[test]
    fn test_invalid_rule() {
        let mut config = user_encrypt_config();
        config.tables[0].columns[0].encryptor = "missing".to_string();
        assert!(matches!(EncryptRule::new(&config), Err(ConfigError::UnknownEncryptor(_))));

        let mut config = user_encrypt_config();
        config.encryptors[1].key = None;
        assert!(matches!(EncryptRule::new(&config), Err(ConfigError::EncryptorKeyRequired(_))));
    }
}
