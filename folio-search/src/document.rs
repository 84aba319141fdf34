//! Document trait and the book model.

use crate::config::BOOKS;
use crate::error::{Result, SearchError};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

/// Trait for documents stored through the facade.
///
/// The identifier is engine metadata, not part of the stored source: it is
/// skipped when projecting and filled in from the hit when reading back.
///
/// # Example
///
/// ```rust
/// use folio_search::Document;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Default, Serialize, Deserialize)]
/// struct Form {
///     #[serde(skip)]
///     id: Option<String>,
///     #[serde(rename = "articleID", skip_serializing_if = "Option::is_none")]
///     article_id: Option<String>,
/// }
///
/// impl Document for Form {
///     fn dataset() -> &'static str {
///         "forms"
///     }
///     fn id(&self) -> Option<&str> {
///         self.id.as_deref()
///     }
///     fn set_id(&mut self, id: String) {
///         self.id = Some(id);
///     }
/// }
///
/// let form = Form { id: Some("f-1".into()), article_id: None };
/// assert!(form.project().unwrap().is_empty());
/// ```
pub trait Document: Serialize + DeserializeOwned + Send + Sync {
    /// Logical dataset name, resolved to a collection through the catalog
    /// configuration.
    fn dataset() -> &'static str;

    /// Identifier, if one has been assigned.
    fn id(&self) -> Option<&str>;

    /// Assign the identifier.
    fn set_id(&mut self, id: String);

    /// Attribute map holding only the attributes that are present.
    ///
    /// Absent attributes are omitted rather than written as `null`, so a
    /// projection used as an update patch never clears stored values.
    fn project(&self) -> Result<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(mut map) => {
                map.retain(|_, v| !v.is_null());
                Ok(map)
            }
            other => Err(SearchError::InvalidRequest(format!(
                "document must serialize to an object, got {}",
                other
            ))),
        }
    }
}

/// A book in the catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Book {
    /// Engine identifier.
    #[serde(skip)]
    pub id: Option<String>,
    /// Author name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Free-text description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    /// Price.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    /// Publish date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish: Option<String>,
    /// Category.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl Book {
    /// A book with just a title.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Set the identifier.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the author.
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    /// Set the description.
    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.info = Some(info.into());
        self
    }

    /// Set the price.
    pub fn with_price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    /// Set the publish date.
    pub fn with_publish(mut self, publish: impl Into<String>) -> Self {
        self.publish = Some(publish.into());
        self
    }

    /// Set the category.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

impl Document for Book {
    fn dataset() -> &'static str {
        BOOKS
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_id(&mut self, id: String) {
        self.id = Some(id);
    }
}
