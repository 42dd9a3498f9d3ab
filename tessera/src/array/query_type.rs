use derive_more::Display;

/// The access mode an array is opened under.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
pub enum QueryType {
    /// Read cells and metadata.
    #[display("read")]
    Read,
    /// Write fragments and metadata.
    #[display("write")]
    Write,
    /// Delete cells.
    #[display("delete")]
    Delete,
    /// Update cells.
    #[display("update")]
    Update,
    /// Write fragments and metadata with exclusive access.
    #[display("modify_exclusive")]
    ModifyExclusive,
}

/// An operation gated by the [`QueryType`] of an open array.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub(crate) enum Operation {
    #[display("consolidate")]
    Consolidate,
    #[display("write metadata to")]
    WriteMetadata,
    #[display("write fragments to")]
    WriteFragment,
}

impl QueryType {
    /// Returns true if the query type never modifies the array.
    #[must_use]
    pub const fn is_readonly(self) -> bool {
        matches!(self, Self::Read)
    }

    /// Returns true if the query type buffers metadata writes that are flushed on close.
    #[must_use]
    pub const fn writes_metadata(self) -> bool {
        matches!(self, Self::Write | Self::ModifyExclusive)
    }

    pub(crate) const fn permits(self, operation: Operation) -> bool {
        match operation {
            Operation::Consolidate => !self.is_readonly(),
            Operation::WriteMetadata => self.writes_metadata(),
            Operation::WriteFragment => {
                matches!(self, Self::Write | Self::Update | Self::ModifyExclusive)
            }
        }
    }

    pub(crate) fn denial(self, operation: Operation) -> String {
        if self.is_readonly() {
            format!("cannot {operation} array opened in readonly mode")
        } else {
            format!("cannot {operation} array opened in {self} mode")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_type_gate() {
        assert!(!QueryType::Read.permits(Operation::Consolidate));
        assert_eq!(
            QueryType::Read.denial(Operation::Consolidate),
            "cannot consolidate array opened in readonly mode"
        );
        assert!(QueryType::Write.permits(Operation::Consolidate));
        assert!(QueryType::Delete.permits(Operation::Consolidate));
        assert!(!QueryType::Delete.permits(Operation::WriteMetadata));
        assert_eq!(
            QueryType::Delete.denial(Operation::WriteMetadata),
            "cannot write metadata to array opened in delete mode"
        );
        assert!(QueryType::ModifyExclusive.permits(Operation::WriteMetadata));
        assert!(QueryType::Update.permits(Operation::WriteFragment));
        assert!(!QueryType::Read.permits(Operation::WriteFragment));
    }
}
