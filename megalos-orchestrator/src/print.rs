//! Dry-run backend.
//!
//! Writes every mutating call as a pretty-printed JSON document instead of
//! sending it anywhere. Creates and deletes always succeed and lists are
//! always empty, so a deploy run through it shows exactly what would be
//! submitted.

use std::io::Write;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

use crate::error::{MegalosError, Result};
use crate::resources::*;
use crate::traits::{BackendCapabilities, ClusterApi};

/// Backend that prints resources instead of creating them.
pub struct PrintBackend {
    out: Mutex<Box<dyn Write + Send>>,
}

impl PrintBackend {
    /// Print to stderr.
    pub fn new() -> Self {
        Self::with_writer(std::io::stderr())
    }

    /// Print to any writer.
    pub fn with_writer(out: impl Write + Send + 'static) -> Self {
        info!("Creating print backend (dry run)");
        Self {
            out: Mutex::new(Box::new(out)),
        }
    }

    fn emit<T: Serialize>(
        &self,
        action: &str,
        namespace: Option<&str>,
        kind: &str,
        name: &str,
        object: Option<&T>,
    ) -> Result<()> {
        let document = json!({
            "action": action,
            "kind": kind,
            "namespace": namespace,
            "name": name,
            "object": object,
        });
        let text = serde_json::to_string_pretty(&document)?;

        let mut out = self
            .out
            .lock()
            .map_err(|_| MegalosError::Internal("Lock poisoned".to_string()))?;
        writeln!(out, "{}", text)?;
        out.flush()?;
        debug!(action, kind, name, "Printed resource");
        Ok(())
    }
}

impl Default for PrintBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClusterApi for PrintBackend {
    async fn capabilities(&self) -> Result<BackendCapabilities> {
        Ok(BackendCapabilities {
            name: "print".to_string(),
            supports_machine_selection: false,
            supports_user_scoped_wipe: false,
            max_object_bytes: 1024 * 1024,
        })
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    async fn server_version(&self) -> Result<String> {
        Ok("print".to_string())
    }

    async fn create_namespace(&self, namespace: &Namespace) -> Result<()> {
        self.emit("create", None, "Namespace", &namespace.metadata.name, Some(namespace))
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        self.emit::<()>("delete", None, "Namespace", name, None)
    }

    async fn list_namespaces(&self, _label_selector: &str) -> Result<Vec<Namespace>> {
        Ok(Vec::new())
    }

    async fn create_config_map(&self, namespace: &str, config_map: &ConfigMap) -> Result<()> {
        self.emit(
            "create",
            Some(namespace),
            "ConfigMap",
            &config_map.metadata.name,
            Some(config_map),
        )
    }

    async fn replace_config_map(&self, namespace: &str, config_map: &ConfigMap) -> Result<()> {
        self.emit(
            "replace",
            Some(namespace),
            "ConfigMap",
            &config_map.metadata.name,
            Some(config_map),
        )
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<()> {
        self.emit::<()>("delete", Some(namespace), "ConfigMap", name, None)
    }

    async fn create_network_attachment(
        &self,
        namespace: &str,
        attachment: &NetworkAttachmentDefinition,
    ) -> Result<()> {
        self.emit(
            "create",
            Some(namespace),
            "NetworkAttachmentDefinition",
            &attachment.metadata.name,
            Some(attachment),
        )
    }

    async fn delete_network_attachment(&self, namespace: &str, name: &str) -> Result<()> {
        self.emit::<()>("delete", Some(namespace), "NetworkAttachmentDefinition", name, None)
    }

    async fn list_network_attachments(
        &self,
        _namespace: &str,
    ) -> Result<Vec<NetworkAttachmentDefinition>> {
        Ok(Vec::new())
    }

    async fn create_deployment(&self, namespace: &str, deployment: &Deployment) -> Result<()> {
        self.emit(
            "create",
            Some(namespace),
            "Deployment",
            &deployment.metadata.name,
            Some(deployment),
        )
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<()> {
        self.emit::<()>("delete", Some(namespace), "Deployment", name, None)
    }

    async fn list_deployments(
        &self,
        _namespace: &str,
        _label_selector: &str,
    ) -> Result<Vec<Deployment>> {
        Ok(Vec::new())
    }

    async fn list_pods(&self, _namespace: &str, _label_selector: &str) -> Result<Vec<Pod>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// Writer whose contents stay readable after the backend takes it.
    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[tokio::test]
    async fn test_create_prints_object() {
        let buffer = SharedBuffer::default();
        let backend = PrintBackend::with_writer(buffer.clone());

        let namespace = Namespace::new(ObjectMeta::new("abc").with_label("app", "kathara"));
        backend.create_namespace(&namespace).await.unwrap();
        backend.create_namespace(&namespace).await.unwrap();

        let text = buffer.text();
        let first = serde_json::Deserializer::from_str(&text)
            .into_iter::<serde_json::Value>()
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(first["action"], "create");
        assert_eq!(first["kind"], "Namespace");
        assert_eq!(first["object"]["metadata"]["labels"]["app"], "kathara");
        assert_eq!(text.matches("\"action\"").count(), 2);
    }

    #[tokio::test]
    async fn test_lists_are_empty() {
        let backend = PrintBackend::with_writer(std::io::sink());
        assert!(backend.list_namespaces("app=kathara").await.unwrap().is_empty());
        assert!(backend.list_deployments("abc", "").await.unwrap().is_empty());
        assert!(backend.delete_deployment("abc", "r1").await.is_ok());
    }
}
