//! Arrays.
//!
//! An array is a prefix in a store holding:
//!  - `__schema.json`: the [`ArraySchema`], [`EncryptionType`] and a key check value,
//!  - `__fragments/` and `__commits/`: immutable timestamped [fragments](fragment) of cell data and their commit markers, and
//!  - `__meta/`: immutable timestamped metadata blocks.
//!
//! The documentation for [`Array`] details how to interact with arrays.

mod array_errors;
mod array_fragments;
mod array_metadata;
mod array_uri;
mod datatype;
mod encryption;
pub mod fragment;
pub(crate) mod metadata_store;
mod query_type;
pub(crate) mod schema;
pub(crate) mod timeline;
mod timestamped_name;

use std::sync::Arc;

use parking_lot::Mutex;

use tessera_storage::{ReadableStorageTraits, WritableStorageTraits};

pub use self::array_errors::ArrayError;
pub use self::array_uri::{ArrayUri, ArrayUriError};
pub use self::datatype::Datatype;
pub use self::encryption::{EncryptionKey, EncryptionType};
pub use self::metadata_store::{MetadataStore, MetadataValue};
pub use self::query_type::QueryType;
pub use self::schema::{ArraySchema, ArrayType, Attribute, Dimension};
pub use self::timestamped_name::{TimestampedName, TimestampedNameError};
pub use crate::consolidation::ConsolidationOptions;

pub(crate) use self::query_type::Operation;

use crate::{activity::ViewReferences, config::Config, context::Context};

/// Whether an [`Array`] closes its [`RawArray`] when dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ownership {
    /// The array closes the raw array on drop if it is open.
    Owned,
    /// The array never closes the raw array on drop.
    Borrowed,
}

/// The state of an open array.
#[derive(Debug)]
struct OpenArray {
    schema: Arc<ArraySchema>,
    timestamp_start: u64,
    timestamp_end: u64,
    fragments: Vec<TimestampedName>,
    metadata: MetadataStore,
    view_id: u64,
}

#[derive(Debug)]
struct ArrayState {
    query_type: QueryType,
    encryption: EncryptionKey,
    config: Option<Config>,
    timestamp_start: u64,
    timestamp_end: Option<u64>,
    open: Option<OpenArray>,
}

impl ArrayState {
    fn require_open(&self) -> Result<&OpenArray, ArrayError> {
        self.open
            .as_ref()
            .ok_or_else(|| ArrayError::InvalidState("the array is not open".to_string()))
    }

    /// The single gate for operations restricted by the query type.
    fn require_mode(&mut self, operation: Operation) -> Result<&mut OpenArray, ArrayError> {
        let query_type = self.query_type;
        let open = self
            .open
            .as_mut()
            .ok_or_else(|| ArrayError::InvalidState("the array is not open".to_string()))?;
        if query_type.permits(operation) {
            Ok(open)
        } else {
            Err(ArrayError::Permission(query_type.denial(operation)))
        }
    }
}

/// The shared handle state underlying an [`Array`].
///
/// A raw array can be shared between [`Array`]s with [`Array::raw`] and [`Array::from_raw`].
#[derive(Debug)]
pub struct RawArray {
    context: Arc<Context>,
    uri: ArrayUri,
    state: Mutex<ArrayState>,
}

impl RawArray {
    /// The array URI.
    #[must_use]
    pub fn uri(&self) -> &ArrayUri {
        &self.uri
    }

    /// Returns true if the array is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state.lock().open.is_some()
    }
}

/// An array handle.
///
/// ## Lifecycle
/// An [`Array`] is either *closed* or *open*.
///  - [`Array::new`] and [`Array::new_with_encryption`] create an open array, and [`Array::bind`] creates a closed array.
///  - [`open`](Array::open) opens a closed array, [`reopen`](Array::reopen) refreshes an open array, and [`close`](Array::close) closes an open array.
///    Opening an open array or closing a closed array fails with [`ArrayError::InvalidState`].
///  - Dropping an open array closes it, unless it was adopted with [`Ownership::Borrowed`].
///
/// Data, metadata and consolidation operations require an open array.
///
/// ## Time Travel
/// An open array sees the fragments and metadata blocks within its timestamp window `[start, end]`.
/// The requested window is set with [`set_open_timestamp_start`](Array::set_open_timestamp_start) and [`set_open_timestamp_end`](Array::set_open_timestamp_end),
/// and applies from the next [`open`](Array::open) or [`reopen`](Array::reopen).
/// The start defaults to 0 and the end defaults to the time the array is opened.
///
/// ## Query Types
/// Operations that modify the array are gated by the [`QueryType`] the array was opened with:
///  - consolidation requires any query type other than [`QueryType::Read`],
///  - metadata writes require [`QueryType::Write`] or [`QueryType::ModifyExclusive`], and
///  - fragment writes require [`QueryType::Write`], [`QueryType::Update`] or [`QueryType::ModifyExclusive`].
///
/// Metadata and fragment reads are permitted in every query type.
///
/// ## Metadata
/// Metadata writes are buffered and flushed as one metadata block when the array is closed or reopened.
/// An array sees its own buffered writes, and deletes are visible immediately.
#[derive(Debug)]
pub struct Array {
    raw: Arc<RawArray>,
    ownership: Ownership,
}

impl Array {
    /// Open the array at `uri` with `query_type`.
    ///
    /// # Errors
    /// Returns an [`ArrayError`] if the array does not exist, is encrypted, or cannot be read.
    pub fn new(ctx: &Arc<Context>, uri: &str, query_type: QueryType) -> Result<Self, ArrayError> {
        Self::new_with_encryption(ctx, uri, query_type, EncryptionKey::none())
    }

    /// Open the encrypted array at `uri` with `query_type`.
    ///
    /// # Errors
    /// Returns an [`ArrayError`] if the array does not exist, the encryption key does not match, or the array cannot be read.
    pub fn new_with_encryption(
        ctx: &Arc<Context>,
        uri: &str,
        query_type: QueryType,
        encryption: EncryptionKey,
    ) -> Result<Self, ArrayError> {
        let array = Self::bind(ctx, uri, encryption)?;
        array.open(query_type)?;
        Ok(array)
    }

    /// Create a closed array bound to `uri`.
    ///
    /// The array is not accessed until it is opened.
    ///
    /// # Errors
    /// Returns [`ArrayError::InvalidArgument`] if `uri` is invalid.
    pub fn bind(
        ctx: &Arc<Context>,
        uri: &str,
        encryption: EncryptionKey,
    ) -> Result<Self, ArrayError> {
        let raw = RawArray {
            context: ctx.clone(),
            uri: ArrayUri::new(uri)?,
            state: Mutex::new(ArrayState {
                query_type: QueryType::Read,
                encryption,
                config: None,
                timestamp_start: 0,
                timestamp_end: None,
                open: None,
            }),
        };
        Ok(Self {
            raw: Arc::new(raw),
            ownership: Ownership::Owned,
        })
    }

    /// Adopt an existing raw array.
    ///
    /// With [`Ownership::Owned`], dropping the returned array closes the raw array if it is open.
    #[must_use]
    pub fn from_raw(raw: Arc<RawArray>, ownership: Ownership) -> Self {
        Self { raw, ownership }
    }

    /// The underlying raw array.
    #[must_use]
    pub fn raw(&self) -> Arc<RawArray> {
        self.raw.clone()
    }

    /// The context of the array.
    #[must_use]
    pub fn context(&self) -> &Arc<Context> {
        &self.raw.context
    }

    /// Returns true if the array is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.raw.is_open()
    }

    /// The array URI.
    #[must_use]
    pub fn uri(&self) -> &ArrayUri {
        &self.raw.uri
    }

    /// The query type of the last open.
    #[must_use]
    pub fn query_type(&self) -> QueryType {
        self.raw.state.lock().query_type
    }

    /// The encryption type of the array key.
    #[must_use]
    pub fn encryption(&self) -> EncryptionType {
        self.raw.state.lock().encryption.encryption_type()
    }

    /// The schema of the open array.
    ///
    /// # Errors
    /// Returns [`ArrayError::InvalidState`] if the array is closed.
    pub fn schema(&self) -> Result<Arc<ArraySchema>, ArrayError> {
        Ok(self.raw.state.lock().require_open()?.schema.clone())
    }

    /// Open the array with `query_type`.
    ///
    /// # Errors
    /// Returns an [`ArrayError`] if
    ///  - the array is already open ([`ArrayError::InvalidState`]),
    ///  - the timestamp window is invalid ([`ArrayError::InvalidArgument`]),
    ///  - the array does not exist ([`ArrayError::StorageError`]),
    ///  - the encryption key does not match ([`ArrayError::Encryption`]), or
    ///  - there is an underlying store error.
    pub fn open(&self, query_type: QueryType) -> Result<(), ArrayError> {
        let mut state = self.raw.state.lock();
        if state.open.is_some() {
            return Err(ArrayError::InvalidState(format!(
                "array {} is already open",
                self.raw.uri
            )));
        }
        let open = self.load(
            query_type,
            &state.encryption,
            state.timestamp_start,
            state.timestamp_end,
        )?;
        state.query_type = query_type;
        state.open = Some(open);
        Ok(())
    }

    /// Reopen the array with the same query type.
    ///
    /// Pending metadata writes are flushed first.
    /// The schema, fragments and metadata are then reloaded with the current requested timestamp window,
    /// picking up fragments and metadata committed since the array was opened.
    ///
    /// # Errors
    /// Returns [`ArrayError::InvalidState`] if the array is closed, or another [`ArrayError`] if the array cannot be reloaded.
    /// The array stays open with its previous view if reloading fails.
    pub fn reopen(&self) -> Result<(), ArrayError> {
        let mut state = self.raw.state.lock();
        let query_type = state.query_type;
        self.flush(&mut state)?;
        let previous_view = state.require_open()?.view_id;
        let open = self.load(
            query_type,
            &state.encryption,
            state.timestamp_start,
            state.timestamp_end,
        )?;
        self.raw
            .context
            .activity()
            .deregister_view(&self.raw.uri, previous_view);
        state.open = Some(open);
        Ok(())
    }

    /// Close the array, flushing pending metadata writes.
    ///
    /// # Errors
    /// Returns [`ArrayError::InvalidState`] if the array is closed, or another [`ArrayError`] if flushing fails.
    /// Pending metadata timestamped before the end of a consolidated metadata block is rejected with [`ArrayError::InvalidArgument`].
    /// The array stays open if flushing fails.
    pub fn close(&self) -> Result<(), ArrayError> {
        let mut state = self.raw.state.lock();
        self.flush(&mut state)?;
        if let Some(open) = state.open.take() {
            self.raw
                .context
                .activity()
                .deregister_view(&self.raw.uri, open.view_id);
            log::debug!("closed array {}", self.raw.uri);
        }
        Ok(())
    }

    /// Set the start of the requested timestamp window.
    ///
    /// Applies from the next [`open`](Array::open) or [`reopen`](Array::reopen).
    pub fn set_open_timestamp_start(&self, timestamp_start: u64) {
        self.raw.state.lock().timestamp_start = timestamp_start;
    }

    /// Set the end of the requested timestamp window.
    ///
    /// Applies from the next [`open`](Array::open) or [`reopen`](Array::reopen).
    pub fn set_open_timestamp_end(&self, timestamp_end: u64) {
        self.raw.state.lock().timestamp_end = Some(timestamp_end);
    }

    /// The start of the effective timestamp window if open, otherwise the requested start.
    #[must_use]
    pub fn open_timestamp_start(&self) -> u64 {
        let state = self.raw.state.lock();
        state
            .open
            .as_ref()
            .map_or(state.timestamp_start, |open| open.timestamp_start)
    }

    /// The end of the effective timestamp window if open, otherwise the requested end.
    ///
    /// Returns [`None`] if the array is closed and no end was requested.
    #[must_use]
    pub fn open_timestamp_end(&self) -> Option<u64> {
        let state = self.raw.state.lock();
        state
            .open
            .as_ref()
            .map_or(state.timestamp_end, |open| Some(open.timestamp_end))
    }

    /// Set the configuration override of the array.
    pub fn set_config(&self, config: Config) {
        self.raw.state.lock().config = Some(config);
    }

    /// The effective configuration: the context configuration overlaid with the array override.
    #[must_use]
    pub fn config(&self) -> Config {
        let state = self.raw.state.lock();
        self.raw.context.effective_config(state.config.as_ref())
    }

    /// Consolidate the array.
    ///
    /// See [`consolidate_opt`](crate::consolidation::consolidate_opt).
    ///
    /// # Errors
    /// Returns [`ArrayError::InvalidState`] if the array is closed, [`ArrayError::Permission`] if it was opened with [`QueryType::Read`],
    /// or another [`ArrayError`] if consolidation fails.
    pub fn consolidate(&self, options: &ConsolidationOptions) -> Result<(), ArrayError> {
        let config = self.gated_config(Operation::Consolidate)?;
        crate::consolidation::consolidate_opt(
            &self.raw.context,
            self.raw.uri.as_str(),
            Some(&config),
            options,
        )
    }

    /// Consolidate the metadata blocks of the array.
    ///
    /// See [`consolidate_metadata`](crate::consolidation::consolidate_metadata).
    ///
    /// # Errors
    /// Returns [`ArrayError::InvalidState`] if the array is closed, [`ArrayError::Permission`] if it was opened with [`QueryType::Read`],
    /// or another [`ArrayError`] if consolidation fails.
    pub fn consolidate_metadata(&self) -> Result<(), ArrayError> {
        let config = self.gated_config(Operation::Consolidate)?;
        crate::consolidation::consolidate_metadata(
            &self.raw.context,
            self.raw.uri.as_str(),
            Some(&config),
        )
    }

    /// Vacuum the array at `uri`.
    ///
    /// See [`vacuum`](crate::vacuum::vacuum).
    ///
    /// # Errors
    /// Returns an [`ArrayError`] if vacuuming fails.
    pub fn vacuum(ctx: &Context, uri: &str, config: Option<&Config>) -> Result<(), ArrayError> {
        crate::vacuum::vacuum(ctx, uri, config)
    }

    /// Create a new array at `uri`.
    ///
    /// # Errors
    /// Returns [`ArrayError::InvalidArgument`] if an array already exists at `uri`, or a [`ArrayError::StorageError`] if the schema cannot be stored.
    pub fn create(
        ctx: &Context,
        uri: &str,
        schema: &ArraySchema,
        encryption: &EncryptionKey,
    ) -> Result<(), ArrayError> {
        let uri = ArrayUri::new(uri)?;
        let storage = ctx.storage();
        if storage.exists(&uri.schema_key()?)? {
            return Err(ArrayError::InvalidArgument(format!(
                "an array already exists at {uri}"
            )));
        }
        schema::store_schema(&**storage, &uri, schema, encryption)?;
        log::debug!("created {} array {uri}", schema.array_type());
        Ok(())
    }

    /// Load the schema of the array at `uri`.
    ///
    /// # Errors
    /// Returns an [`ArrayError`] if the array does not exist or the encryption key does not match.
    pub fn load_schema(
        ctx: &Context,
        uri: &str,
        encryption: &EncryptionKey,
    ) -> Result<ArraySchema, ArrayError> {
        let uri = ArrayUri::new(uri)?;
        schema::retrieve_schema(&**ctx.storage(), &uri, encryption)
    }

    /// The encryption type of the array at `uri`.
    ///
    /// # Errors
    /// Returns an [`ArrayError`] if the array does not exist.
    pub fn encryption_type(ctx: &Context, uri: &str) -> Result<EncryptionType, ArrayError> {
        let uri = ArrayUri::new(uri)?;
        Ok(schema::retrieve_encryption_type(&**ctx.storage(), &uri)?)
    }

    /// Delete the array at `uri` and everything stored under it.
    ///
    /// # Errors
    /// Returns an [`ArrayError`] if
    ///  - the array does not exist,
    ///  - the array is open, being consolidated or being vacuumed in `ctx` ([`ArrayError::ConcurrentModification`]), or
    ///  - there is an underlying store error.
    pub fn delete_array(ctx: &Context, uri: &str) -> Result<(), ArrayError> {
        let uri = ArrayUri::new(uri)?;
        let storage = ctx.storage();
        schema::retrieve_encryption_type(&**storage, &uri)?;
        let _guard = ctx.activity().begin_vacuum(&uri)?;
        if ctx.activity().open_views(&uri) > 0 {
            return Err(ArrayError::ConcurrentModification(format!(
                "cannot delete array {uri} while it is open"
            )));
        }
        storage.erase_prefix(uri.prefix())?;
        log::debug!("deleted array {uri}");
        Ok(())
    }

    fn gated_config(&self, operation: Operation) -> Result<Config, ArrayError> {
        let mut state = self.raw.state.lock();
        state.require_mode(operation)?;
        Ok(self.raw.context.effective_config(state.config.as_ref()))
    }

    /// Flush pending metadata writes of an open array opened with a query type that writes metadata.
    fn flush(&self, state: &mut ArrayState) -> Result<(), ArrayError> {
        let query_type = state.query_type;
        let Some(open) = state.open.as_mut() else {
            return Err(ArrayError::InvalidState(format!(
                "array {} is not open",
                self.raw.uri
            )));
        };
        if query_type.writes_metadata() && open.metadata.has_pending() {
            let timestamp = open.timestamp_end;
            let storage = self.raw.context.storage();
            // consolidated blocks may have dropped tombstones that an earlier block would need
            let timeline = metadata_store::list_metadata_blocks(&**storage, &self.raw.uri)?;
            if let Some(merged) = timeline
                .merged()
                .find(|merged| timestamp < merged.timestamp_end())
            {
                return Err(ArrayError::InvalidArgument(format!(
                    "cannot write metadata of array {} at timestamp {timestamp} before the end of consolidated metadata block {merged}",
                    self.raw.uri
                )));
            }
            let name = TimestampedName::new(timestamp, timestamp);
            open.metadata.flush(&**storage, &self.raw.uri, &name)?;
        }
        Ok(())
    }

    /// Load the view of the array for the timestamp window `[timestamp_start, timestamp_end]` and register it with the context.
    fn load(
        &self,
        query_type: QueryType,
        encryption: &EncryptionKey,
        timestamp_start: u64,
        timestamp_end: Option<u64>,
    ) -> Result<OpenArray, ArrayError> {
        let ctx = &self.raw.context;
        let uri = &self.raw.uri;
        let storage = ctx.storage();
        let timestamp_end = timestamp_end.unwrap_or_else(|| ctx.now());
        if timestamp_start > timestamp_end {
            return Err(ArrayError::InvalidArgument(format!(
                "the timestamp window start {timestamp_start} exceeds the end {timestamp_end}"
            )));
        }
        let schema = Arc::new(schema::retrieve_schema(&**storage, uri, encryption)?);
        let view_id = ctx.activity().new_view_id();
        loop {
            let generation = ctx.activity().vacuum_generation();
            let fragments =
                fragment::list_fragments(&**storage, uri)?.visible(timestamp_start, timestamp_end);
            let blocks = metadata_store::list_metadata_blocks(&**storage, uri)?
                .visible(timestamp_start, timestamp_end);
            let mut records = Vec::with_capacity(blocks.len());
            for name in &blocks {
                match metadata_store::retrieve_block(&**storage, uri, name)? {
                    Some(block) => records.push(block),
                    None => break,
                }
            }
            if records.len() < blocks.len() {
                log::debug!("metadata of array {uri} changed while opening, retrying");
                continue;
            }

            let references = ViewReferences {
                fragments: fragments.iter().copied().collect(),
                metadata: blocks.iter().copied().collect(),
            };
            if ctx
                .activity()
                .register_view(uri, view_id, references, generation)
            {
                log::debug!(
                    "opened array {uri} for {query_type} at [{timestamp_start}, {timestamp_end}] with {} fragment(s) and {} metadata block(s)",
                    fragments.len(),
                    blocks.len()
                );
                return Ok(OpenArray {
                    schema,
                    timestamp_start,
                    timestamp_end,
                    fragments,
                    metadata: MetadataStore::from_records(records),
                    view_id,
                });
            }
            std::thread::yield_now();
        }
    }
}

impl Drop for Array {
    fn drop(&mut self) {
        if self.ownership != Ownership::Owned {
            return;
        }
        let mut state = self.raw.state.lock();
        if state.open.is_none() {
            return;
        }
        if let Err(err) = self.flush(&mut state) {
            log::warn!(
                "failed to flush metadata of array {} on drop: {err}",
                self.raw.uri
            );
        }
        if let Some(open) = state.open.take() {
            self.raw
                .context
                .activity()
                .deregister_view(&self.raw.uri, open.view_id);
        }
    }
}
