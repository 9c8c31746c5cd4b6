//! Assembling complete containers.
//!
//! [`FileBuilder`] lays segments out back to back in the order a
//! single-pass writer produces them: file header, sub-blocks, sub-block
//! directory, metadata, attachments and finally the attachments directory.

use uuid::Uuid;

use crate::attachment::{AttachmentEntry, encode_attachment, encode_attachments_directory};
use crate::directory::{DirectoryEntry, encode_directory};
use crate::header::FileHeader;
use crate::metadata::encode_metadata;
use crate::subblock::encode_subblock;

struct PendingSubBlock {
    entry: DirectoryEntry,
    metadata: Vec<u8>,
    data: Vec<u8>,
    attachment: Vec<u8>,
}

struct PendingAttachment {
    entry: AttachmentEntry,
    data: Vec<u8>,
}

/// Builds a container in memory.
///
/// The file positions of the directory entries are filled in by
/// [`build()`](Self::build); whatever the entries carry is ignored.
#[derive(Default)]
#[must_use]
pub struct FileBuilder {
    primary_file_guid: Uuid,
    file_guid: Uuid,
    subblocks: Vec<PendingSubBlock>,
    metadata: Option<Vec<u8>>,
    attachments: Vec<PendingAttachment>,
}

impl FileBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn guids(mut self, primary: Uuid, file: Uuid) -> Self {
        self.primary_file_guid = primary;
        self.file_guid = file;
        self
    }

    /// Adds a tile with its compressed bitmap. Tiles are indexed in the order
    /// they are added.
    pub fn subblock(self, entry: DirectoryEntry, data: impl Into<Vec<u8>>) -> Self {
        self.subblock_with(entry, Vec::new(), data, Vec::new())
    }

    /// Adds a tile with per-tile metadata and attachment payloads.
    pub fn subblock_with(
        mut self,
        entry: DirectoryEntry,
        metadata: impl Into<Vec<u8>>,
        data: impl Into<Vec<u8>>,
        attachment: impl Into<Vec<u8>>,
    ) -> Self {
        self.subblocks.push(PendingSubBlock {
            entry,
            metadata: metadata.into(),
            data: data.into(),
            attachment: attachment.into(),
        });
        self
    }

    /// Sets the metadata XML.
    pub fn metadata(mut self, xml: impl Into<Vec<u8>>) -> Self {
        self.metadata = Some(xml.into());
        self
    }

    /// Adds an attachment. Its file position is filled in when building.
    pub fn attachment(mut self, entry: AttachmentEntry, data: impl Into<Vec<u8>>) -> Self {
        self.attachments.push(PendingAttachment {
            entry,
            data: data.into(),
        });
        self
    }

    /// Lays out and encodes every segment.
    #[must_use]
    pub fn build(self) -> Vec<u8> {
        // The header is rewritten once the positions are known.
        let mut out = FileHeader::new(0, 0, 0).to_bytes();
        let mut entries = Vec::with_capacity(self.subblocks.len());

        for block in self.subblocks {
            let entry = block.entry.with_file_position(out.len() as u64);

            out.extend(encode_subblock(&entry, &block.metadata, &block.data, &block.attachment));
            entries.push(entry);
        }

        let directory_position = out.len() as u64;
        out.extend(encode_directory(&entries));

        let metadata_position = match &self.metadata {
            Some(xml) => {
                let position = out.len() as u64;
                out.extend(encode_metadata(xml, &[]));
                position
            }
            None => 0,
        };

        let attachment_directory_position = if self.attachments.is_empty() {
            0
        } else {
            let mut entries = Vec::with_capacity(self.attachments.len());

            for attachment in self.attachments {
                let mut entry = attachment.entry;
                entry.file_position = out.len() as u64;

                out.extend(encode_attachment(&entry, &attachment.data));
                entries.push(entry);
            }

            let position = out.len() as u64;
            out.extend(encode_attachments_directory(&entries));
            position
        };

        let header = FileHeader::new(directory_position, metadata_position, attachment_directory_position)
            .with_guids(self.primary_file_guid, self.file_guid)
            .to_bytes();

        out[..header.len()].copy_from_slice(&header);
        out
    }
}
