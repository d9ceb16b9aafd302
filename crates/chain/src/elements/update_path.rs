use async_trait::async_trait;
use networkservice::{
    Acknowledgement, ChainError, ClientName, Connection, NetworkServiceRequest, Path, PathSegment,
};

use crate::{ChainElement, Next};

/// Ensures the path carries a segment for this client and points at it.
pub struct UpdatePath {
    name: ClientName,
}

impl UpdatePath {
    /// Creates the element for client `name`.
    pub fn new(name: ClientName) -> Self {
        Self { name }
    }

    /// Points `path` at this client's segment, appending one with `id` if absent.
    fn claim(&self, path: &mut Path, id: &str) -> usize {
        if let Some(index) = path
            .segments
            .iter()
            .position(|s| s.name == self.name.as_str())
        {
            path.segments[index].id = id.to_string();
            path.index = index;
            return index;
        }
        path.segments.push(PathSegment {
            name: self.name.to_string(),
            id: id.to_string(),
            token: String::new(),
            expires: None,
        });
        path.index = path.segments.len() - 1;
        path.index
    }
}

#[async_trait]
impl ChainElement for UpdatePath {
    fn name(&self) -> &'static str {
        "update-path"
    }

    async fn request(
        &self,
        mut request: NetworkServiceRequest,
        next: Next<'_>,
    ) -> Result<Connection, ChainError> {
        let id = request.id.to_string();
        let index = self.claim(&mut request.path, &id);
        let mut connection = next.request(request).await?;
        // The manager advances the index as the request travels; hand back ours.
        if index < connection.path.segments.len() {
            connection.path.index = index;
        }
        Ok(connection)
    }

    async fn close(
        &self,
        mut connection: Connection,
        next: Next<'_>,
    ) -> Result<Acknowledgement, ChainError> {
        let id = connection.id.to_string();
        self.claim(&mut connection.path, &id);
        next.close(connection).await
    }
}
