pub mod error;
pub mod source;
pub mod header;
pub mod directory;
pub mod codec;
pub mod crypto;
pub mod payload;
pub mod stream;
pub mod archive;

pub use archive::{ArchiveHandle, ArchiveState, ArkOptions, EntryRef};
pub use error::{ArkError, FormatError, Result};
pub use header::{ArchiveHeader, Encryption, FormatVersion};
pub use directory::{Directory, EntryRecord};
pub use codec::{Compression, get_codec};
pub use crypto::EntryCipher;
pub use stream::EntryReader;
pub use source::{ByteSource, SeekSource};
