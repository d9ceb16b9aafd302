use std::collections::HashMap;
use std::fs::File;
use std::os::fd::AsRawFd;
use std::os::unix::fs::MetadataExt;

use async_trait::async_trait;
use networkservice::{
    Acknowledgement, ChainError, Connection, ConnectionId, NetworkServiceRequest,
    ResourceDescriptor,
};
use parking_lot::Mutex;

use crate::{ChainElement, Next};

const NAME: &str = "send-fd";
const FILE_SCHEME: &str = "file://";

/// Hands local files referenced by mechanism parameters to the manager.
///
/// Every `file://` parameter value is opened, rewritten to
/// `inode://<dev>/<ino>`, and attached to the call as a [`ResourceDescriptor`].
/// The open handles are held for the life of the connection.
#[derive(Default)]
pub struct SendFd {
    held: Mutex<HashMap<ConnectionId, Vec<File>>>,
}

impl SendFd {
    /// Creates the element with nothing held.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of descriptors currently held for `id`.
    pub fn held(&self, id: &ConnectionId) -> usize {
        self.held.lock().get(id).map_or(0, Vec::len)
    }
}

fn open_inode(path: &str) -> Result<(File, String), ChainError> {
    let file = File::open(path)
        .map_err(|err| ChainError::rejected(NAME, format!("cannot open {path}: {err}")))?;
    let meta = file
        .metadata()
        .map_err(|err| ChainError::rejected(NAME, format!("cannot stat {path}: {err}")))?;
    let url = format!("inode://{}/{}", meta.dev(), meta.ino());
    Ok((file, url))
}

#[async_trait]
impl ChainElement for SendFd {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn request(
        &self,
        mut request: NetworkServiceRequest,
        next: Next<'_>,
    ) -> Result<Connection, ChainError> {
        let mut opened: HashMap<String, String> = HashMap::new();
        let mut files = Vec::new();
        let pid = std::process::id();

        for mechanism in &mut request.mechanism_preferences {
            for value in mechanism.parameters.values_mut() {
                let Some(path) = value.strip_prefix(FILE_SCHEME) else {
                    continue;
                };
                let url = match opened.get(path) {
                    Some(url) => url.clone(),
                    None => {
                        let (file, url) = open_inode(path)?;
                        request.resources.push(ResourceDescriptor {
                            url: url.clone(),
                            pid,
                            fd: file.as_raw_fd(),
                        });
                        opened.insert(path.to_string(), url.clone());
                        files.push(file);
                        url
                    }
                };
                *value = url;
            }
        }

        let id = request.id.clone();
        let connection = next.request(request).await?;
        if !files.is_empty() {
            self.held.lock().entry(id).or_default().extend(files);
        }
        Ok(connection)
    }

    async fn close(
        &self,
        connection: Connection,
        next: Next<'_>,
    ) -> Result<Acknowledgement, ChainError> {
        if let Some(files) = self.held.lock().remove(&connection.id) {
            tracing::debug!(
                connection = %connection.id,
                count = files.len(),
                "releasing descriptors"
            );
        }
        next.close(connection).await
    }
}
