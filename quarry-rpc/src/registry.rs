use crate::{Access, Envelope, Operation, OperationError, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Registry of the operations a deployment exposes.
///
/// The registry is responsible for:
/// - Registering operations the deployment is allowed to expose
/// - Looking up operations by name
/// - Checking the caller's access before executing
/// - Providing operation specifications to clients
pub struct OperationRegistry {
    operations: BTreeMap<String, Arc<dyn Operation>>,
    granted_access: Access,
}

impl OperationRegistry {
    /// Create a registry that may expose operations up to `granted_access`.
    pub fn new(granted_access: Access) -> Self {
        Self {
            operations: BTreeMap::new(),
            granted_access,
        }
    }

    /// Register an operation if the granted access covers it.
    /// Returns true if the operation was registered.
    pub fn register(&mut self, operation: Arc<dyn Operation>) -> bool {
        let required = operation.required_access();

        if !self.granted_access.allows(&required) {
            return false;
        }

        self.operations.insert(operation.name().to_string(), operation);
        true
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Operation>> {
        self.operations.get(name)
    }

    /// Registered operation names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.operations.keys().map(|s| s.as_str()).collect()
    }

    /// Execute an operation on behalf of a caller holding `caller` access.
    pub async fn execute_as(&self, caller: Access, name: &str, input: Value) -> Result<Value> {
        let operation = self
            .get(name)
            .ok_or_else(|| OperationError::UnknownOperation(name.to_string()))?;

        if !caller.allows(&operation.required_access()) {
            return Err(OperationError::Unauthorized(format!(
                "caller may not invoke {}",
                name
            )));
        }

        operation.execute(input).await
    }

    /// Execute an operation with the registry's own access.
    pub async fn execute(&self, name: &str, input: Value) -> Result<Value> {
        self.execute_as(self.granted_access, name, input).await
    }

    /// Like [`execute_as`](Self::execute_as), wrapped for the wire.
    pub async fn invoke_as(&self, caller: Access, name: &str, input: Value) -> Envelope {
        Envelope::from_result(self.execute_as(caller, name, input).await)
    }

    pub async fn invoke(&self, name: &str, input: Value) -> Envelope {
        self.invoke_as(self.granted_access, name, input).await
    }

    /// Operation specifications for clients.
    pub fn specs(&self) -> Vec<Value> {
        self.operations
            .values()
            .map(|operation| {
                serde_json::json!({
                    "name": operation.name(),
                    "description": operation.description(),
                    "parameters": operation.parameter_schema(),
                })
            })
            .collect()
    }
}
