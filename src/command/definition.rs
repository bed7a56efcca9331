//! Command definitions and their access metadata

use std::fmt;
use std::str::FromStr;

use device_agent_shared::{CommandError, ErrorCode, ObjectSchema};

/// Which clients may see and invoke a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Visibility {
    pub local: bool,
    pub cloud: bool,
}

impl Visibility {
    pub const fn all() -> Self {
        Self {
            local: true,
            cloud: true,
        }
    }

    pub const fn none() -> Self {
        Self {
            local: false,
            cloud: false,
        }
    }
}

impl Default for Visibility {
    fn default() -> Self {
        Self::all()
    }
}

impl FromStr for Visibility {
    type Err = CommandError;

    /// Parses `all`, `none` or a comma-separated list of `local`/`cloud`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => return Ok(Self::all()),
            "none" => return Ok(Self::none()),
            _ => {}
        }

        let mut visibility = Self::none();
        for token in s.split(',').map(str::trim) {
            match token {
                "local" => visibility.local = true,
                "cloud" => visibility.cloud = true,
                other => {
                    return Err(CommandError::new(
                        ErrorCode::InvalidPropValue,
                        format!("Invalid command visibility value '{other}'"),
                    ))
                }
            }
        }
        Ok(visibility)
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match (self.local, self.cloud) {
            (true, true) => "all",
            (false, false) => "none",
            (true, false) => "local",
            (false, true) => "cloud",
        };
        f.write_str(text)
    }
}

/// Minimal role a caller needs to run a command, in increasing order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum UserRole {
    Viewer,
    #[default]
    User,
    Manager,
    Owner,
}

impl UserRole {
    pub fn as_str(self) -> &'static str {
        match self {
            UserRole::Viewer => "viewer",
            UserRole::User => "user",
            UserRole::Manager => "manager",
            UserRole::Owner => "owner",
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserRole {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "viewer" => Ok(UserRole::Viewer),
            "user" => Ok(UserRole::User),
            "manager" => Ok(UserRole::Manager),
            "owner" => Ok(UserRole::Owner),
            other => Err(CommandError::new(
                ErrorCode::InvalidPropValue,
                format!("Invalid role: '{other}'"),
            )),
        }
    }
}

/// Schemas and metadata of one named command.
///
/// Definitions are shared between the dictionary and the instances created
/// from them. Only visibility and minimal role change after loading.
#[derive(Debug, Clone)]
pub struct CommandDefinition {
    category: String,
    parameters: ObjectSchema,
    progress: ObjectSchema,
    results: ObjectSchema,
    visibility: Visibility,
    minimal_role: UserRole,
}

impl CommandDefinition {
    pub fn new(
        category: impl Into<String>,
        parameters: ObjectSchema,
        progress: ObjectSchema,
        results: ObjectSchema,
    ) -> Self {
        Self {
            category: category.into(),
            parameters,
            progress,
            results,
            visibility: Visibility::all(),
            minimal_role: UserRole::User,
        }
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn parameters(&self) -> &ObjectSchema {
        &self.parameters
    }

    pub fn progress(&self) -> &ObjectSchema {
        &self.progress
    }

    pub fn results(&self) -> &ObjectSchema {
        &self.results
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    pub fn set_visibility(&mut self, visibility: Visibility) {
        self.visibility = visibility;
    }

    pub fn minimal_role(&self) -> UserRole {
        self.minimal_role
    }

    pub fn set_minimal_role(&mut self, role: UserRole) {
        self.minimal_role = role;
    }
}
