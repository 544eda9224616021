mod firebase;
mod key;
mod selection;
mod transport;
mod types;

pub use firebase::FirebaseStorage;
pub use key::ObjectKey;
pub use selection::{accept_selection, SelectionCandidate, IMAGE_EXTENSIONS};
pub use transport::{
    ProgressSender, SessionEvent, StorageTransport, TransportError, TransportEvent,
};
pub use types::{FileSource, SelectedFile, UploadedObject};
