use tessera_storage::Bytes;

use super::{
    Array, ArrayError, Operation, TimestampedName,
    fragment::{self, Cells},
};

impl Array {
    /// Write a fragment of `cells` and commit it.
    ///
    /// The fragment is timestamped with the end of the effective timestamp window of the array.
    /// It becomes visible to arrays opened (or reopened) afterwards, including this one after [`reopen`](Array::reopen).
    ///
    /// Returns the name of the committed fragment.
    ///
    /// # Errors
    /// Returns an [`ArrayError`] if
    ///  - the array is closed ([`ArrayError::InvalidState`]),
    ///  - the array was not opened for writing fragments ([`ArrayError::Permission`]),
    ///  - `cells` is empty or a coordinate lies outside the array domain ([`ArrayError::InvalidArgument`]),
    ///  - the write timestamp lies within `[t1, t2)` of a consolidated fragment, which would take precedence over it ([`ArrayError::InvalidArgument`]), or
    ///  - there is an underlying store error.
    pub fn write_fragment(
        &self,
        cells: impl IntoIterator<Item = (Vec<u64>, Bytes)>,
    ) -> Result<TimestampedName, ArrayError> {
        let mut state = self.raw.state.lock();
        let open = state.require_mode(Operation::WriteFragment)?;
        let cells: Cells = cells.into_iter().collect();
        if cells.is_empty() {
            return Err(ArrayError::InvalidArgument(
                "a fragment must contain at least one cell".to_string(),
            ));
        }
        for coordinates in cells.keys() {
            open.schema.check_coordinates(coordinates)?;
        }
        let timestamp = open.timestamp_end;
        let storage = self.raw.context.storage();
        let timeline = fragment::list_fragments(&**storage, &self.raw.uri)?;
        if let Some(merged) = timeline.merged().find(|merged| {
            merged.timestamp_start() <= timestamp && timestamp < merged.timestamp_end()
        }) {
            return Err(ArrayError::InvalidArgument(format!(
                "cannot write a fragment at timestamp {timestamp} within the range of consolidated fragment {merged}"
            )));
        }
        let name = TimestampedName::new(timestamp, timestamp);
        fragment::store_fragment(
            &**storage,
            &self.raw.uri,
            &name,
            &cells,
            &[],
        )?;
        Ok(name)
    }

    /// Read the cells of the fragments visible to the array.
    ///
    /// Fragments are applied in precedence order, so the latest fragment wins for each coordinate.
    ///
    /// # Errors
    /// Returns [`ArrayError::InvalidState`] if the array is closed, [`ArrayError::FragmentNotFound`] if a visible fragment was removed from the store,
    /// or a [`ArrayError::StorageError`] if a fragment cannot be read.
    pub fn read_cells(&self) -> Result<Cells, ArrayError> {
        let fragments = self.fragments()?;
        let storage = self.raw.context.storage();
        let mut cells = Cells::new();
        for name in fragments {
            let fragment = fragment::retrieve_fragment(&**storage, &self.raw.uri, &name)?
                .ok_or_else(|| ArrayError::FragmentNotFound(name.to_string()))?;
            cells.extend(fragment);
        }
        Ok(cells)
    }

    /// The fragments visible to the array, in precedence order.
    ///
    /// # Errors
    /// Returns [`ArrayError::InvalidState`] if the array is closed.
    pub fn fragments(&self) -> Result<Vec<TimestampedName>, ArrayError> {
        Ok(self.raw.state.lock().require_open()?.fragments.clone())
    }
}
