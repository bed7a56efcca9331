//! Command dictionary
//!
//! Definitions are keyed by their full `package.command` name and loaded a
//! category at a time. Reloading a category replaces every definition that
//! category owned.

use std::collections::BTreeMap;
use std::sync::Arc;

use device_agent_shared::limits::CUSTOM_COMMAND_PREFIX;
use device_agent_shared::{CommandError, ErrorCode, ObjectSchema, Result};
use serde_json::{Map, Value};
use tracing::{debug, error, info};

use super::definition::{CommandDefinition, UserRole, Visibility};

const PARAMETERS: &str = "parameters";
const PROGRESS: &str = "progress";
const RESULTS: &str = "results";
const VISIBILITY: &str = "visibility";
const MINIMAL_ROLE: &str = "minimalRole";

#[derive(Debug, Default, Clone)]
pub struct CommandDictionary {
    definitions: BTreeMap<String, Arc<CommandDefinition>>,
}

impl CommandDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a `package -> command -> definition` document as `category`.
    ///
    /// With a `base` dictionary each command is reconciled against the base
    /// command of the same name, and commands unknown to the base must use
    /// the custom command prefix. Nothing changes unless the whole document
    /// is valid.
    pub fn load_commands(
        &mut self,
        doc: &Value,
        category: &str,
        base: Option<&CommandDictionary>,
    ) -> Result<()> {
        let packages = doc.as_object().ok_or_else(|| {
            CommandError::new(
                ErrorCode::TypeMismatch,
                "Command definitions must be a JSON object",
            )
        })?;

        let mut new_defs = BTreeMap::new();
        for (package_name, package) in packages {
            let commands = package.as_object().ok_or_else(|| {
                CommandError::new(
                    ErrorCode::TypeMismatch,
                    format!("Expecting an object for package '{package_name}'"),
                )
            })?;

            for (command_name, command_def) in commands {
                if command_name.is_empty() {
                    return Err(CommandError::new(
                        ErrorCode::InvalidCommandName,
                        format!("Unnamed command encountered in package '{package_name}'"),
                    ));
                }
                let command_def = command_def.as_object().ok_or_else(|| {
                    CommandError::new(
                        ErrorCode::TypeMismatch,
                        format!("Expecting an object for command '{command_name}'"),
                    )
                })?;

                let full_name = format!("{package_name}.{command_name}");
                let definition =
                    build_definition(&full_name, command_name, command_def, category, base)?;
                new_defs.insert(full_name, Arc::new(definition));
            }
        }

        // A command owned by another category must never be overwritten
        for name in new_defs.keys() {
            if let Some(existing) = self.definitions.get(name) {
                if existing.category() != category {
                    error!(
                        "Definition for command '{}' overrides an earlier definition in category '{}'",
                        name,
                        existing.category()
                    );
                    return Err(CommandError::new(
                        ErrorCode::DuplicateCommandDefinition,
                        format!(
                            "Definition for command '{}' overrides an earlier definition in category '{}'",
                            name,
                            existing.category()
                        ),
                    ));
                }
            }
        }

        self.definitions.retain(|_, def| def.category() != category);
        let count = new_defs.len();
        self.definitions.extend(new_defs);
        info!("Loaded {} command definitions for category '{}'", count, category);
        Ok(())
    }

    /// Render the definitions accepted by `filter` as a
    /// `package -> command -> {parameters, minimalRole}` document
    pub fn get_commands_as_json<F>(&self, filter: F, full_schema: bool) -> Value
    where
        F: Fn(&CommandDefinition) -> bool,
    {
        let mut packages = Map::new();
        for (name, def) in &self.definitions {
            if !filter(def) {
                continue;
            }
            let Some((package_name, command_name)) = name.split_once('.') else {
                debug!("Skipping command without package: {}", name);
                continue;
            };

            let mut command = Map::new();
            command.insert(PARAMETERS.into(), def.parameters().to_json(full_schema, true));
            command.insert(MINIMAL_ROLE.into(), Value::String(def.minimal_role().as_str().into()));

            if let Value::Object(package) = packages
                .entry(package_name.to_owned())
                .or_insert_with(|| Value::Object(Map::new()))
            {
                package.insert(command_name.to_owned(), Value::Object(command));
            }
        }
        Value::Object(packages)
    }

    pub fn find_command(&self, name: &str) -> Option<&Arc<CommandDefinition>> {
        self.definitions.get(name)
    }

    pub fn get_command_names_by_category(&self, category: &str) -> Vec<String> {
        self.definitions
            .iter()
            .filter(|(_, def)| def.category() == category)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Change the visibility of the named commands. Fails without changing
    /// anything if a name is unknown. Instances already created keep the
    /// definition they were created with.
    pub fn set_command_visibility(&mut self, names: &[&str], visibility: Visibility) -> Result<()> {
        if let Some(unknown) = names.iter().find(|name| !self.definitions.contains_key(**name)) {
            return Err(CommandError::new(
                ErrorCode::InvalidCommandName,
                format!("Command '{unknown}' is unknown"),
            ));
        }
        for name in names {
            if let Some(def) = self.definitions.get_mut(*name) {
                Arc::make_mut(def).set_visibility(visibility);
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn clear(&mut self) {
        self.definitions.clear();
    }
}

fn build_definition(
    full_name: &str,
    command_name: &str,
    doc: &Map<String, Value>,
    category: &str,
    base: Option<&CommandDictionary>,
) -> Result<CommandDefinition> {
    let base_def = base.and_then(|b| b.find_command(full_name));
    if base.is_some() && base_def.is_none() && !command_name.starts_with(CUSTOM_COMMAND_PREFIX) {
        return Err(CommandError::new(
            ErrorCode::InvalidCommandName,
            format!(
                "The name of custom command '{}' must start with '{}'",
                full_name, CUSTOM_COMMAND_PREFIX
            ),
        ));
    }

    let parameters = build_schema(doc, PARAMETERS, base_def.map(|d| d.parameters()), full_name)?;
    let progress = build_schema(doc, PROGRESS, base_def.map(|d| d.progress()), full_name)?;
    let results = build_schema(doc, RESULTS, base_def.map(|d| d.results()), full_name)?;

    let mut definition = CommandDefinition::new(category, parameters, progress, results);
    if let Some(base_def) = base_def {
        definition.set_visibility(base_def.visibility());
        definition.set_minimal_role(base_def.minimal_role());
    }

    if let Some(value) = doc.get(VISIBILITY) {
        let visibility = value
            .as_str()
            .ok_or_else(|| {
                CommandError::new(
                    ErrorCode::TypeMismatch,
                    format!("Property '{VISIBILITY}' must be a string"),
                )
            })
            .and_then(str::parse::<Visibility>)
            .map_err(|err| {
                err.wrap(
                    ErrorCode::InvalidCommandVisibility,
                    format!("Error parsing command '{full_name}'"),
                )
            })?;
        definition.set_visibility(visibility);
    }

    if let Some(value) = doc.get(MINIMAL_ROLE) {
        let role = value
            .as_str()
            .ok_or_else(|| {
                CommandError::new(
                    ErrorCode::TypeMismatch,
                    format!("Property '{MINIMAL_ROLE}' must be a string"),
                )
            })
            .and_then(str::parse::<UserRole>)
            .map_err(|err| {
                err.wrap(
                    ErrorCode::InvalidMinimalRole,
                    format!("Error parsing command '{full_name}'"),
                )
            })?;
        definition.set_minimal_role(role);
    }

    Ok(definition)
}

fn build_schema(
    doc: &Map<String, Value>,
    key: &str,
    base: Option<&ObjectSchema>,
    full_name: &str,
) -> Result<ObjectSchema> {
    let empty = Map::new();
    let schema_doc = match doc.get(key) {
        None => &empty,
        Some(Value::Object(map)) => map,
        Some(other) => {
            return Err(CommandError::new(
                ErrorCode::TypeMismatch,
                format!("Property '{key}' must be a JSON object, got {other}"),
            ))
        }
    };
    ObjectSchema::from_json(schema_doc, base).map_err(|err| {
        err.wrap(
            ErrorCode::InvalidObjectSchema,
            format!("Invalid definition for command '{full_name}'"),
        )
    })
}
