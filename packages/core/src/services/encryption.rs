//! Encryption Adapter
//!
//! Transforms fields carrying the encrypted marker between plaintext and
//! stored form. The per-level operations ([`EncryptionAdapter::encrypt`],
//! [`EncryptionAdapter::decrypt`]) touch only the direct fields of one
//! record; the graph operations apply them to every owned level.
//!
//! Searchable fields use the cipher's deterministic mode, so predicates can
//! be rewritten to compare against the stored form.
//!
//! # Known limitation
//!
//! [`EncryptionAdapter::rewrite`] only rewrites comparisons whose left side
//! is a direct (single-level) field access and whose right side is a string
//! literal. Dotted paths, `Contains`, `In` and case-insensitive comparisons
//! against encrypted fields are passed through unchanged and will not
//! match stored ciphertext. Comparisons against randomized (non-searchable)
//! fields are rewritten but can never match either.

use crate::crypto::{CryptoError, FieldCipher};
use crate::models::{Document, Encryption, Expr, Operand, RecordType};
use crate::services::reflector::Reflector;
use serde_json::Value;
use std::sync::Arc;

#[derive(Clone, Copy)]
enum Direction {
    Encrypt,
    Decrypt,
}

/// Field-level encryption over record documents
#[derive(Clone)]
pub struct EncryptionAdapter {
    cipher: Option<Arc<dyn FieldCipher>>,
    reflector: &'static Reflector,
}

impl EncryptionAdapter {
    pub fn new(cipher: Option<Arc<dyn FieldCipher>>) -> Self {
        Self {
            cipher,
            reflector: Reflector::global(),
        }
    }

    pub fn has_cipher(&self) -> bool {
        self.cipher.is_some()
    }

    /// Encrypt the marked fields of one record level
    ///
    /// Non-record values are left untouched.
    pub fn encrypt(&self, ty: &RecordType, value: &mut Value) -> Result<(), CryptoError> {
        match value {
            Value::Object(doc) => self.transform_level(ty, doc, Direction::Encrypt),
            _ => Ok(()),
        }
    }

    /// Decrypt the marked fields of one record level
    pub fn decrypt(&self, ty: &RecordType, value: &mut Value) -> Result<(), CryptoError> {
        match value {
            Value::Object(doc) => self.transform_level(ty, doc, Direction::Decrypt),
            _ => Ok(()),
        }
    }

    /// Encrypt every level of a record graph
    pub fn encrypt_graph(&self, ty: &RecordType, doc: &mut Document) -> Result<(), CryptoError> {
        self.transform_graph(ty, doc, Direction::Encrypt)
    }

    /// Decrypt every level of a record graph
    pub fn decrypt_graph(&self, ty: &RecordType, doc: &mut Document) -> Result<(), CryptoError> {
        self.transform_graph(ty, doc, Direction::Decrypt)
    }

    /// Rewrite literals compared against encrypted fields of `ty`
    pub fn rewrite(&self, ty: &RecordType, expr: &Expr) -> Result<Expr, CryptoError> {
        let schema = self.reflector.schema_of(ty);
        if !schema.has_encrypted_fields() {
            return Ok(expr.clone());
        }

        Ok(match expr {
            Expr::Compare { op, left, right } => {
                let encryption = left
                    .direct_field()
                    .and_then(|name| schema.get(name))
                    .and_then(|field| field.encryption.map(|e| (field.name.as_str(), e)));
                match (encryption, right) {
                    (Some((name, encryption)), Operand::Literal(Value::String(plain)))
                        if !plain.is_empty() =>
                    {
                        Expr::Compare {
                            op: *op,
                            left: left.clone(),
                            right: Operand::Literal(Value::String(
                                self.apply(name, encryption, plain, Direction::Encrypt)?,
                            )),
                        }
                    }
                    _ => expr.clone(),
                }
            }
            Expr::And(exprs) => Expr::And(
                exprs
                    .iter()
                    .map(|e| self.rewrite(ty, e))
                    .collect::<Result<_, _>>()?,
            ),
            Expr::Or(exprs) => Expr::Or(
                exprs
                    .iter()
                    .map(|e| self.rewrite(ty, e))
                    .collect::<Result<_, _>>()?,
            ),
            Expr::Not(inner) => Expr::Not(Box::new(self.rewrite(ty, inner)?)),
            other => other.clone(),
        })
    }

    fn transform_graph(
        &self,
        ty: &RecordType,
        doc: &mut Document,
        direction: Direction,
    ) -> Result<(), CryptoError> {
        self.transform_level(ty, doc, direction)?;

        let fields = self.reflector.fields(ty);
        for field in fields.iter() {
            if let Some(child_ty) = field.kind.child_record() {
                if let Some(Value::Object(child)) = doc.get_mut(&field.name) {
                    self.transform_graph(child_ty, child, direction)?;
                }
            } else if let Some(child_ty) = field.kind.child_collection() {
                if let Some(Value::Array(items)) = doc.get_mut(&field.name) {
                    for child in items.iter_mut().filter_map(Value::as_object_mut) {
                        self.transform_graph(child_ty, child, direction)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn transform_level(
        &self,
        ty: &RecordType,
        doc: &mut Document,
        direction: Direction,
    ) -> Result<(), CryptoError> {
        let schema = self.reflector.schema_of(ty);
        for field in &schema.fields {
            let Some(encryption) = field.encryption else {
                continue;
            };
            if let Some(Value::String(current)) = doc.get_mut(&field.name) {
                if current.is_empty() {
                    continue;
                }
                *current = self.apply(&field.name, encryption, current, direction)?;
            }
        }
        Ok(())
    }

    fn apply(
        &self,
        field: &str,
        encryption: Encryption,
        input: &str,
        direction: Direction,
    ) -> Result<String, CryptoError> {
        let cipher = self.cipher.as_ref().ok_or_else(|| CryptoError::MissingKey {
            field: field.to_string(),
        })?;
        match (direction, encryption.searchable) {
            (Direction::Encrypt, true) => cipher.encrypt_deterministic(input),
            (Direction::Encrypt, false) => cipher.encrypt(input),
            (Direction::Decrypt, true) => cipher.decrypt_deterministic(input),
            (Direction::Decrypt, false) => cipher.decrypt(input),
        }
    }
}
