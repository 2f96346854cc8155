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


use sha1::{Digest, Sha1};

use crate::{config::EncryptorType, value::SqlValue};

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn from_hex(raw: &str) -> Option<Vec<u8>> {
    if raw.len() % 2 != 0 {
        return None;
    }
    (0..raw.len())
        .step_by(2)
        .map(|i| raw.get(i..i + 2).and_then(|b| u8::from_str_radix(b, 16).ok()))
        .collect()
}

fn plain_bytes(value: &SqlValue) -> Vec<u8> {
    match value {
        SqlValue::Bytes(v) => v.clone(),
        other => other.to_string().into_bytes(),
    }
}

fn sha1_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    to_hex(&hasher.finalize())
}

/// Applies the RC4 keystream to `data`. Encrypting and decrypting are the same operation.
fn rc4(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut s: Vec<u8> = (0..=255).collect();
    let mut j: u8 = 0;
    for i in 0..256 {
        j = j.wrapping_add(s[i]).wrapping_add(key[i % key.len()]);
        s.swap(i, j as usize);
    }

    let (mut i, mut j) = (0u8, 0u8);
    data.iter()
        .map(|b| {
            i = i.wrapping_add(1);
            j = j.wrapping_add(s[i as usize]);
            s.swap(i as usize, j as usize);
            let k = s[(s[i as usize].wrapping_add(s[j as usize])) as usize];
            b ^ k
        })
        .collect()
}

/// Column value encryptor. Ciphers are lower-case hex strings; `NULL` passes through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encryptor {
    /// SHA-1 digest, irreversible.
    Sha1,
    Rc4 { key: Vec<u8> },
}

impl Encryptor {
    /// `key` must be present and non-empty for reversible encryptors.
    pub fn new(encryptor_type: EncryptorType, key: Option<&str>) -> Option<Self> {
        match encryptor_type {
            EncryptorType::Sha1 => Some(Encryptor::Sha1),
            EncryptorType::Rc4 => match key {
                Some(key) if !key.is_empty() => Some(Encryptor::Rc4 { key: key.as_bytes().to_vec() }),
                _ => None,
            },
        }
    }

    pub fn is_reversible(&self) -> bool {
        matches!(self, Encryptor::Rc4 { .. })
    }

    pub fn encrypt(&self, plain: &SqlValue) -> SqlValue {
        if plain.is_null() {
            return SqlValue::Null;
        }

        let bytes = plain_bytes(plain);
        match self {
            Encryptor::Sha1 => SqlValue::Str(sha1_hex(&bytes)),
            Encryptor::Rc4 { key } => SqlValue::Str(to_hex(&rc4(key, &bytes))),
        }
    }

    /// Deterministic digest stored in the assisted query column.
    pub fn encrypt_assisted(&self, plain: &SqlValue) -> SqlValue {
        if plain.is_null() {
            return SqlValue::Null;
        }
        SqlValue::Str(sha1_hex(&plain_bytes(plain)))
    }

    /// `None` when the encryptor is irreversible or the cipher is malformed.
    pub fn decrypt(&self, cipher: &SqlValue) -> Option<SqlValue> {
        match (self, cipher) {
            (_, SqlValue::Null) => Some(SqlValue::Null),
            (Encryptor::Rc4 { key }, SqlValue::Str(hex)) => {
                let bytes = rc4(key, &from_hex(hex)?);
                String::from_utf8(bytes).ok().map(SqlValue::Str)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_sha1() {
        let encryptor = Encryptor::new(EncryptorType::Sha1, None).unwrap();
        assert_eq!(
            encryptor.encrypt(&SqlValue::from("abc")),
            SqlValue::from("a9993e364706816aba3e25717850c26c9cd0d89d")
        );
        assert_eq!(
            encryptor.encrypt(&SqlValue::Int(1)),
            SqlValue::from("356a192b7913b04c54574d18c28d46e6395428ab")
        );
        assert_eq!(encryptor.encrypt(&SqlValue::Null), SqlValue::Null);
        assert_eq!(encryptor.decrypt(&SqlValue::from("356a")), None);
    }

    #[test]
    fn test_rc4() {
        assert!(Encryptor::new(EncryptorType::Rc4, None).is_none());

        let encryptor = Encryptor::new(EncryptorType::Rc4, Some("Key")).unwrap();
        // Known keystream vector for key "Key".
        assert_eq!(encryptor.encrypt(&SqlValue::from("Plaintext")), SqlValue::from("bbf316e8d940af0ad3"));
        assert_eq!(
            encryptor.decrypt(&SqlValue::from("bbf316e8d940af0ad3")),
            Some(SqlValue::from("Plaintext"))
        );
        assert_eq!(encryptor.decrypt(&SqlValue::from("zz")), None);
        assert!(encryptor.is_reversible());
    }
}
