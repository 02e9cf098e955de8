use super::client::{ClientError, PropertyClient, VariableValue};
use tracing::debug;

/// A simulator property and its last successfully read value
#[derive(Debug, Clone, PartialEq)]
pub struct VariableBinding {
    path: String,
    value: VariableValue,
}

impl VariableBinding {
    /// Reads `path` once; the binding only exists if that read succeeds
    pub async fn fetch(
        client: &mut PropertyClient,
        path: &str,
    ) -> Result<Option<Self>, ClientError> {
        Ok(client.get_variable(path).await?.map(|value| Self {
            path: path.to_string(),
            value,
        }))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn value(&self) -> &VariableValue {
        &self.value
    }

    /// Re-reads the property. The stored value is only replaced on a
    /// successful read; returns whether that happened.
    pub async fn refresh(&mut self, client: &mut PropertyClient) -> Result<bool, ClientError> {
        match client.get_variable(&self.path).await? {
            Some(value) => {
                self.value = value;
                Ok(true)
            }
            None => {
                debug!("Keeping last value of {}", self.path);
                Ok(false)
            }
        }
    }
}
