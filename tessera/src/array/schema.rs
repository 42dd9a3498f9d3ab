use std::collections::HashSet;

use derive_more::Display;
use serde::{Deserialize, Serialize};

use tessera_storage::{
    Bytes, ReadableStorageTraits, StorageError, StoreKey, WritableStorageTraits,
};

use super::{ArrayError, ArrayUri, Datatype, EncryptionKey, EncryptionType};

/// The layout of an array.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrayType {
    /// Every cell in the domain exists.
    #[display("dense")]
    Dense,
    /// Only written cells exist.
    #[display("sparse")]
    Sparse,
}

/// A named array dimension with an inclusive domain.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimension {
    name: String,
    domain: [u64; 2],
}

impl Dimension {
    /// Create a new dimension spanning `[lower, upper]`.
    ///
    /// # Errors
    /// Returns [`ArrayError::InvalidArgument`] if `name` is empty or `lower > upper`.
    pub fn new(name: impl Into<String>, lower: u64, upper: u64) -> Result<Self, ArrayError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ArrayError::InvalidArgument(
                "dimension names must not be empty".to_string(),
            ));
        }
        if lower > upper {
            return Err(ArrayError::InvalidArgument(format!(
                "dimension {name} has an empty domain [{lower}, {upper}]"
            )));
        }
        Ok(Self {
            name,
            domain: [lower, upper],
        })
    }

    /// The dimension name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The inclusive domain `[lower, upper]`.
    #[must_use]
    pub const fn domain(&self) -> [u64; 2] {
        self.domain
    }

    /// Returns true if `coordinate` is within the domain.
    #[must_use]
    pub const fn contains(&self, coordinate: u64) -> bool {
        self.domain[0] <= coordinate && coordinate <= self.domain[1]
    }
}

/// A named array attribute.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Attribute {
    name: String,
    datatype: Datatype,
}

impl Attribute {
    /// Create a new attribute.
    #[must_use]
    pub fn new(name: impl Into<String>, datatype: Datatype) -> Self {
        Self {
            name: name.into(),
            datatype,
        }
    }

    /// The attribute name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The attribute data type.
    #[must_use]
    pub const fn datatype(&self) -> Datatype {
        self.datatype
    }
}

/// An array schema.
///
/// The schema is validated on construction and never mutated by `tessera`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArraySchema {
    array_type: ArrayType,
    dimensions: Vec<Dimension>,
    attributes: Vec<Attribute>,
}

impl ArraySchema {
    /// Create a new array schema.
    ///
    /// # Errors
    /// Returns [`ArrayError::InvalidArgument`] if there are no dimensions, no attributes, or names are empty or repeated.
    pub fn new(
        array_type: ArrayType,
        dimensions: Vec<Dimension>,
        attributes: Vec<Attribute>,
    ) -> Result<Self, ArrayError> {
        let schema = Self {
            array_type,
            dimensions,
            attributes,
        };
        schema.validate()?;
        Ok(schema)
    }

    fn validate(&self) -> Result<(), ArrayError> {
        if self.dimensions.is_empty() {
            return Err(ArrayError::InvalidArgument(
                "an array schema requires at least one dimension".to_string(),
            ));
        }
        if self.attributes.is_empty() {
            return Err(ArrayError::InvalidArgument(
                "an array schema requires at least one attribute".to_string(),
            ));
        }
        let mut names = HashSet::new();
        for name in self
            .dimensions
            .iter()
            .map(Dimension::name)
            .chain(self.attributes.iter().map(Attribute::name))
        {
            if name.is_empty() || !names.insert(name) {
                return Err(ArrayError::InvalidArgument(format!(
                    "invalid or repeated dimension/attribute name {name:?}"
                )));
            }
        }
        for dimension in &self.dimensions {
            if dimension.domain[0] > dimension.domain[1] {
                return Err(ArrayError::InvalidArgument(format!(
                    "dimension {} has an empty domain",
                    dimension.name
                )));
            }
        }
        Ok(())
    }

    /// The array type.
    #[must_use]
    pub const fn array_type(&self) -> ArrayType {
        self.array_type
    }

    /// The dimensions.
    #[must_use]
    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    /// The attributes.
    #[must_use]
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Check that `coordinates` address a cell in the domain of the array.
    ///
    /// # Errors
    /// Returns [`ArrayError::InvalidArgument`] if the dimensionality does not match or a coordinate is out of bounds.
    pub fn check_coordinates(&self, coordinates: &[u64]) -> Result<(), ArrayError> {
        if coordinates.len() != self.dimensions.len() {
            return Err(ArrayError::InvalidArgument(format!(
                "coordinates {coordinates:?} have dimensionality {}, expected {}",
                coordinates.len(),
                self.dimensions.len()
            )));
        }
        for (dimension, &coordinate) in self.dimensions.iter().zip(coordinates) {
            if !dimension.contains(coordinate) {
                return Err(ArrayError::InvalidArgument(format!(
                    "coordinate {coordinate} is outside the domain {:?} of dimension {}",
                    dimension.domain, dimension.name
                )));
            }
        }
        Ok(())
    }
}

const SCHEMA_FORMAT_VERSION: u32 = 1;

/// The persisted schema document.
#[derive(Debug, Serialize, Deserialize)]
struct SchemaDocument {
    format_version: u32,
    schema: ArraySchema,
    encryption_type: EncryptionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key_check: Option<u32>,
}

/// Store the schema document of a new array.
pub(crate) fn store_schema<TStorage: ?Sized + WritableStorageTraits>(
    storage: &TStorage,
    uri: &ArrayUri,
    schema: &ArraySchema,
    encryption: &EncryptionKey,
) -> Result<(), StorageError> {
    let key = uri.schema_key()?;
    let document = SchemaDocument {
        format_version: SCHEMA_FORMAT_VERSION,
        schema: schema.clone(),
        encryption_type: encryption.encryption_type(),
        key_check: encryption.check_value(),
    };
    let json = serde_json::to_vec_pretty(&document)
        .map_err(|err| StorageError::InvalidMetadata(key.clone(), err.to_string()))?;
    storage.set(&key, Bytes::from(json))
}

fn retrieve_document<TStorage: ?Sized + ReadableStorageTraits>(
    storage: &TStorage,
    uri: &ArrayUri,
) -> Result<SchemaDocument, StorageError> {
    let key: StoreKey = uri.schema_key()?;
    let bytes = storage
        .get(&key)?
        .ok_or_else(|| StorageError::MissingMetadata(uri.prefix().clone()))?;
    let document: SchemaDocument = serde_json::from_slice(&bytes)
        .map_err(|err| StorageError::InvalidMetadata(key.clone(), err.to_string()))?;
    if document.format_version != SCHEMA_FORMAT_VERSION {
        return Err(StorageError::InvalidMetadata(
            key,
            format!("unsupported format version {}", document.format_version),
        ));
    }
    Ok(document)
}

/// Retrieve the schema of an array, verifying the encryption key.
pub(crate) fn retrieve_schema<TStorage: ?Sized + ReadableStorageTraits>(
    storage: &TStorage,
    uri: &ArrayUri,
    encryption: &EncryptionKey,
) -> Result<ArraySchema, ArrayError> {
    let document = retrieve_document(storage, uri)?;
    encryption.verify(document.encryption_type, document.key_check)?;
    document.schema.validate()?;
    Ok(document.schema)
}

/// Retrieve the encryption type of an array.
pub(crate) fn retrieve_encryption_type<TStorage: ?Sized + ReadableStorageTraits>(
    storage: &TStorage,
    uri: &ArrayUri,
) -> Result<EncryptionType, StorageError> {
    Ok(retrieve_document(storage, uri)?.encryption_type)
}
