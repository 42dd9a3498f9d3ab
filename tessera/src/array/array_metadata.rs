use tessera_storage::Bytes;

use super::{Array, ArrayError, Datatype, MetadataValue, Operation};

impl Array {
    /// Put a metadata value at `key`, replacing any existing value.
    ///
    /// `value` must hold exactly `value_num` elements of `datatype`.
    /// The write is visible to this array immediately and flushed to the store when the array is closed or reopened.
    ///
    /// # Errors
    /// Returns an [`ArrayError`] if
    ///  - the array is closed ([`ArrayError::InvalidState`]),
    ///  - the array was not opened with [`QueryType::Write`](super::QueryType::Write) or [`QueryType::ModifyExclusive`](super::QueryType::ModifyExclusive) ([`ArrayError::Permission`]), or
    ///  - `key` is empty, `value_num` is zero or the length of `value` does not match ([`ArrayError::InvalidArgument`]).
    pub fn put_metadata(
        &self,
        key: &str,
        datatype: Datatype,
        value_num: u32,
        value: impl Into<Bytes>,
    ) -> Result<(), ArrayError> {
        let mut state = self.raw.state.lock();
        let open = state.require_mode(Operation::WriteMetadata)?;
        let value = MetadataValue::new(datatype, value_num, value)?;
        open.metadata.put(key, value)
    }

    /// Delete the metadata value at `key`.
    ///
    /// Deleting an absent key is a no-op.
    ///
    /// # Errors
    /// Returns [`ArrayError::InvalidState`] if the array is closed, or [`ArrayError::Permission`] if the array was not opened for writing metadata.
    pub fn delete_metadata(&self, key: &str) -> Result<(), ArrayError> {
        let mut state = self.raw.state.lock();
        state.require_mode(Operation::WriteMetadata)?.metadata.delete(key);
        Ok(())
    }

    /// Get the metadata value at `key`.
    ///
    /// # Errors
    /// Returns [`ArrayError::InvalidState`] if the array is closed, or [`ArrayError::KeyNotFound`] if `key` is absent.
    pub fn get_metadata(&self, key: &str) -> Result<MetadataValue, ArrayError> {
        let state = self.raw.state.lock();
        state.require_open()?.metadata.get(key).cloned()
    }

    /// Get the metadata key and value at `index` in insertion order.
    ///
    /// # Errors
    /// Returns [`ArrayError::InvalidState`] if the array is closed, or [`ArrayError::IndexOutOfRange`] if `index` is not less than [`metadata_num`](Array::metadata_num).
    pub fn get_metadata_from_index(&self, index: u64) -> Result<(String, MetadataValue), ArrayError> {
        let state = self.raw.state.lock();
        let (key, value) = state.require_open()?.metadata.get_by_index(index)?;
        Ok((key.to_string(), value.clone()))
    }

    /// Returns the data type of the metadata value at `key`, or [`None`] if `key` is absent.
    ///
    /// # Errors
    /// Returns [`ArrayError::InvalidState`] if the array is closed.
    pub fn has_metadata(&self, key: &str) -> Result<Option<Datatype>, ArrayError> {
        let state = self.raw.state.lock();
        Ok(state.require_open()?.metadata.has(key))
    }

    /// The number of metadata entries.
    ///
    /// # Errors
    /// Returns [`ArrayError::InvalidState`] if the array is closed.
    pub fn metadata_num(&self) -> Result<u64, ArrayError> {
        let state = self.raw.state.lock();
        Ok(state.require_open()?.metadata.count())
    }
}
