use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// The kinds of domain entity a photo can be attached to.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ParentKind {
    Adventure,
    Review,
    Experience,
}

impl ParentKind {
    /// Join table linking images to this kind of parent.
    pub fn link_table(self) -> &'static str {
        match self {
            ParentKind::Adventure => "adventure_images",
            ParentKind::Review => "review_images",
            ParentKind::Experience => "experience_images",
        }
    }

    /// Foreign key column of the join table pointing at the parent row.
    pub fn link_column(self) -> &'static str {
        match self {
            ParentKind::Adventure => "fk_adventure",
            ParentKind::Review => "fk_review",
            ParentKind::Experience => "fk_experience",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ParentKind::Adventure => "adventure",
            ParentKind::Review => "review",
            ParentKind::Experience => "experience",
        }
    }
}

impl fmt::Display for ParentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParentKind {
    type Err = String;

    // Accepts both the singular and the plural form so routes read naturally.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "adventure" | "adventures" => Ok(ParentKind::Adventure),
            "review" | "reviews" => Ok(ParentKind::Review),
            "experience" | "experiences" => Ok(ParentKind::Experience),
            other => Err(format!("unknown parent kind `{}`", other)),
        }
    }
}

/// Reference to the entity an image is attached to. Only the id is known here.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParentRef {
    pub kind: ParentKind,
    pub id: i64,
}

impl ParentRef {
    pub fn adventure(id: i64) -> Self {
        Self { kind: ParentKind::Adventure, id }
    }

    pub fn review(id: i64) -> Self {
        Self { kind: ParentKind::Review, id }
    }

    pub fn experience(id: i64) -> Self {
        Self { kind: ParentKind::Experience, id }
    }
}

impl fmt::Display for ParentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

/// An object that has been fully written to the object store.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MediaObject {
    pub key: String,
    pub location: String,
    pub original_name: String,
}

/// Fields needed to link a stored object to its parent and uploader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAssociation {
    pub parent: ParentRef,
    pub object_key: String,
    pub object_location: String,
    pub caption: Option<String>,
    pub uploading_user_id: i64,
}

impl NewAssociation {
    pub fn for_object(
        parent: ParentRef,
        object: &MediaObject,
        caption: Option<String>,
        uploading_user_id: i64,
    ) -> Self {
        Self {
            parent,
            object_key: object.key.clone(),
            object_location: object.location.clone(),
            caption,
            uploading_user_id,
        }
    }
}

/// Fields needed to record a stored object against its uploader alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewImage {
    pub object_key: String,
    pub object_location: String,
    pub caption: Option<String>,
    pub uploading_user_id: i64,
}

impl NewImage {
    pub fn for_object(object: &MediaObject, caption: Option<String>, uploading_user_id: i64) -> Self {
        Self {
            object_key: object.key.clone(),
            object_location: object.location.clone(),
            caption,
            uploading_user_id,
        }
    }
}

/// An `images` row with no parent link, owned by the uploading user.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    pub id: i64,
    pub object_key: String,
    pub object_location: String,
    pub caption: Option<String>,
    pub uploading_user_id: i64,
    pub created_at: DateTime<Utc>,
}

/// Relational row linking a stored object to a parent entity and its uploader.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AssociationRecord {
    pub id: i64,
    pub object_key: String,
    pub object_location: String,
    pub caption: Option<String>,
    pub parent: ParentRef,
    pub uploading_user_id: i64,
    pub created_at: DateTime<Utc>,
}
