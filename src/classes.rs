use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const ELECTRIC_BUS: &str = "electric bus";
pub const ELECTRIC_CAR: &str = "electric car";

/// The ordered list of class names. A class's position is its integer label,
/// so the same list must be used for training and inference; it is persisted
/// inside every model artifact for that reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct ClassList(Vec<String>);

impl ClassList
{
    pub fn new<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Result<Self>
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(Error::InvalidConfig("class list is empty".to_string()));
        }
        for (i, name) in names.iter().enumerate()
        {
            if name.trim().is_empty() {
                return Err(Error::InvalidConfig(format!("class {} has an empty name", i)));
            }
            if names[..i].contains(name) {
                return Err(Error::InvalidConfig(format!("class {:?} is listed twice", name)));
            }
        }
        Ok(ClassList(names))
    }

    /// `["electric bus", "electric car"]`
    pub fn electric_vehicles() -> Self
    {
        ClassList(vec![ELECTRIC_BUS.to_string(), ELECTRIC_CAR.to_string()])
    }

    pub fn len(&self) -> usize
    {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.0.is_empty()
    }

    pub fn name(&self, index: usize) -> Option<&str>
    {
        self.0.get(index).map(String::as_str)
    }

    /// Like `name()`, but an unknown index is an error.
    pub fn resolve(&self, index: usize) -> Result<&str>
    {
        self.name(index).ok_or(Error::UnknownClassIndex { index, num_classes: self.len() })
    }

    pub fn index_of(&self, name: &str) -> Option<usize>
    {
        self.0.iter().position(|n| n == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str>
    {
        self.0.iter().map(String::as_str)
    }

    /// Directory names tried, in order, when looking for a class's images:
    /// the class name itself, then the name with spaces replaced by underscores.
    pub fn directory_candidates(name: &str) -> Vec<String>
    {
        let mut candidates = vec![name.to_string()];
        let underscored = name.replace(' ', "_");
        if underscored != name {
            candidates.push(underscored);
        }
        candidates
    }
}

impl Default for ClassList
{
    fn default() -> Self
    {
        ClassList::electric_vehicles()
    }
}

impl TryFrom<Vec<String>> for ClassList
{
    type Error = Error;

    fn try_from(names: Vec<String>) -> Result<Self>
    {
        ClassList::new(names)
    }
}

impl From<ClassList> for Vec<String>
{
    fn from(classes: ClassList) -> Self
    {
        classes.0
    }
}
