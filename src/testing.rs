//! Resource fixtures shared by unit tests.

use serde::{Deserialize, Serialize};

use crate::model::{Base, FieldSpec, Model};
use crate::{field, has_many, has_one};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    #[serde(flatten)]
    pub base: Base,
    pub name: String,
    pub email: String,
    pub age: u32,
    pub nickname: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub password: String,
}

impl Model for User {
    fn resource_name() -> &'static str {
        "user"
    }

    fn fields() -> Vec<FieldSpec<Self>> {
        vec![
            field!(User, name),
            field!(User, email),
            field!(User, age),
            field!(User, nickname),
            field!(User, password).not_queryable(),
        ]
    }

    fn base(&self) -> &Base {
        &self.base
    }

    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }
}

pub fn user(id: &str, name: &str, email: &str) -> User {
    let mut u = User {
        name: name.to_string(),
        email: email.to_string(),
        ..Default::default()
    };
    u.base.id = id.to_string();
    u
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Node {
    #[serde(flatten)]
    pub base: Base,
    pub title: String,
    pub parent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<Box<Node>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Node>,
}

impl Model for Node {
    fn resource_name() -> &'static str {
        "node"
    }

    fn fields() -> Vec<FieldSpec<Self>> {
        vec![
            field!(Node, title),
            field!(Node, parent_id),
            has_one!(Node, parent),
            has_many!(Node, children),
        ]
    }

    fn base(&self) -> &Base {
        &self.base
    }

    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }
}

/// Declares two relations but only lets `lead` be expanded.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Team {
    #[serde(flatten)]
    pub base: Base,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lead: Option<Box<User>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<User>,
}

impl Model for Team {
    fn resource_name() -> &'static str {
        "team"
    }

    fn fields() -> Vec<FieldSpec<Self>> {
        vec![field!(Team, title), has_one!(Team, lead), has_many!(Team, members)]
    }

    fn expands(&self) -> Vec<&'static str> {
        vec!["lead"]
    }

    fn base(&self) -> &Base {
        &self.base
    }

    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }
}
