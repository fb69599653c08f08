//! Saved lists: named sets of objects the service keeps for a user.
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use intermine_model::Model;
use intermine_query::{Operator, Query, QueryBuilder};

use parking_lot::Mutex;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use snafu::ResultExt;

use crate::client::{ClientError, MalformedResponseSnafu, QuerySnafu, Result, ServiceConnection, UnknownListSnafu};
use crate::transport::Method;

const DEFAULT_NAME_PREFIX: &str = "my_list_";
const DEFAULT_DESCRIPTION: &str = "List created with intermine-client";

type Lists = Arc<BTreeMap<String, SavedList>>;

/// A list as the service describes it.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SavedList {
    pub name: String,

    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// The class of the objects in the list.
    #[serde(rename = "type")]
    pub list_type: String,

    pub size: usize,

    #[serde(default)]
    pub date_created: Option<String>,

    /// Whether the current user may change the list.
    #[serde(default)]
    pub authorized: bool,

    #[serde(default)]
    pub tags: Vec<String>,
}

impl SavedList {
    /// A query for the ids of the objects in the list.
    pub fn to_query(&self, model: Arc<Model>) -> Result<QueryBuilder> {
        let mut builder = QueryBuilder::new(model);
        builder.add_view(&format!("{}.id", self.list_type))?;
        builder.add_constraint(&self.list_type, Operator::In, self.name.as_str())?;
        Ok(builder)
    }

    /// A query for every attribute of the objects in the list.
    pub fn to_attribute_query(&self, model: Arc<Model>) -> Result<QueryBuilder> {
        let views: Vec<String> = model
            .get_class(&self.list_type)?
            .attributes()
            .map(|f| format!("{}.{}", self.list_type, f.name))
            .collect();

        let mut builder = QueryBuilder::new(model);
        builder.add_views(views)?;
        builder.add_constraint(&self.list_type, Operator::In, self.name.as_str())?;
        Ok(builder)
    }
}

impl fmt::Display for SavedList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} {})", self.name, self.size, self.list_type)?;
        if let Some(date) = self.date_created.as_deref() {
            write!(f, " {}", date)?;
        }
        if let Some(description) = self.description.as_deref() {
            write!(f, " {}", description)?;
        }
        Ok(())
    }
}

/// The list an operation created or changed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListUpload {
    pub list: SavedList,
    /// Identifiers that matched no object.
    pub unmatched_identifiers: BTreeSet<String>,
}

/// Name and description of a list about to be made.
///
/// Without a name, the first free `my_list_N` is used and the list counts as temporary.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub name: Option<String>,
    pub description: Option<String>,
}

impl ListOptions {
    pub fn named<S: Into<String>>(name: S) -> Self {
        Self {
            name: Some(name.into()),
            description: None,
        }
    }

    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A list to create from identifiers.
#[derive(Clone, Debug)]
pub struct NewList {
    list_type: String,
    identifiers: Vec<String>,
    options: ListOptions,
}

impl NewList {
    pub fn new<T, I, S>(list_type: T, identifiers: I) -> Self
    where
        T: Into<String>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            list_type: list_type.into(),
            identifiers: identifiers.into_iter().map(Into::into).collect(),
            options: ListOptions::default(),
        }
    }

    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.options.name = Some(name.into());
        self
    }

    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.options.description = Some(description.into());
        self
    }
}

/// One identifier per line, quoted so identifiers with spaces stay whole.
fn identifier_body<S: AsRef<str>>(identifiers: &[S]) -> String {
    identifiers
        .iter()
        .map(|id| format!("\"{}\"", id.as_ref()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn param<V: Into<String>>(name: &str, value: V) -> (String, String) {
    (String::from(name), value.into())
}

/// Lists known to a connection, and the names it made up itself.
#[derive(Debug, Default)]
pub(crate) struct ListCache {
    known: Mutex<Option<Lists>>,
    temporary: Mutex<BTreeSet<String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListsResponse {
    #[serde(default)]
    was_successful: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    lists: Vec<SavedList>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateResponse {
    #[serde(default)]
    was_successful: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    list_name: Option<String>,
    #[serde(default)]
    unmatched_identifiers: Vec<String>,
}

fn parse_response<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| ClientError::MalformedResponseError {
        message: format!("unreadable list response: {}", e),
    })
}

/// A service answering 200 with `wasSuccessful: false`.
fn reported_failure(error: Option<String>) -> ClientError {
    ClientError::ServerReturnedError {
        status: 200,
        message: error.unwrap_or_else(|| String::from("the service reported a failure")),
    }
}

impl ServiceConnection {
    /// Every list the user can see, by name. Fetched once, see [`refresh_lists`].
    ///
    /// [`refresh_lists`]: ServiceConnection::refresh_lists
    pub async fn lists(&self) -> Result<Lists> {
        let cached = self.list_cache.known.lock().clone();
        match cached {
            Some(lists) => Ok(lists),
            None => self.refresh_lists().await,
        }
    }

    pub async fn refresh_lists(&self) -> Result<Lists> {
        let body = self.fetch("/lists", vec![param("format", "json")]).await?;
        let response: ListsResponse = parse_response(&body)?;
        if !response.was_successful {
            return Err(reported_failure(response.error));
        }

        let lists: BTreeMap<String, SavedList> = response
            .lists
            .into_iter()
            .map(|l| (l.name.clone(), l))
            .collect();
        tracing::debug!(count = lists.len(), "fetched lists");

        let lists = Arc::new(lists);
        *self.list_cache.known.lock() = Some(lists.clone());
        Ok(lists)
    }

    pub async fn list(&self, name: &str) -> Result<SavedList> {
        let lists = self.lists().await?;
        lists
            .get(name)
            .cloned()
            .ok_or_else(|| UnknownListSnafu { name }.build())
    }

    pub async fn list_count(&self) -> Result<usize> {
        Ok(self.lists().await?.len())
    }

    /// A query for the ids of the objects in the list called `name`.
    pub async fn list_query(&self, name: &str) -> Result<QueryBuilder> {
        let list = self.list(name).await?;
        list.to_query(self.fetch_model().await?)
    }

    /// Creates a list of the objects matching `list.identifiers`.
    pub async fn create_list(&self, list: NewList) -> Result<ListUpload> {
        let NewList {
            list_type,
            identifiers,
            options,
        } = list;
        let (name, description) = self
            .name_and_description(options, || String::from(DEFAULT_DESCRIPTION))
            .await?;

        let params = vec![
            param("name", name),
            param("type", list_type),
            param("description", description),
        ];
        let body = self
            .exchange(Method::Post, "/lists", params, Some(identifier_body(&identifiers)))
            .await?;
        self.read_update(&body).await
    }

    /// Creates a list of the objects a query returns. The query views a single id column.
    pub async fn create_list_from_query(&self, query: &Query, options: ListOptions) -> Result<ListUpload> {
        let xml = query.to_xml().context(QuerySnafu)?;
        let (name, description) = self
            .name_and_description(options, || String::from(DEFAULT_DESCRIPTION))
            .await?;

        let params = vec![
            param("query", xml),
            param("listName", name),
            param("description", description),
        ];
        let body = self
            .exchange(Method::Post, "/query/tolist", params, None)
            .await?;
        self.read_update(&body).await
    }

    /// Adds the objects matching `identifiers` to an existing list.
    pub async fn append_to_list<I, S>(&self, name: &str, identifiers: I) -> Result<ListUpload>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let identifiers: Vec<String> = identifiers.into_iter().map(Into::into).collect();
        let body = self
            .exchange(
                Method::Post,
                "/lists/append",
                vec![param("name", name)],
                Some(identifier_body(&identifiers)),
            )
            .await?;
        self.read_update(&body).await
    }

    /// Renames a list. A renamed list is no longer temporary.
    pub async fn rename_list(&self, old_name: &str, new_name: &str) -> Result<SavedList> {
        if old_name == new_name {
            return self.list(old_name).await;
        }

        let params = vec![param("oldname", old_name), param("newname", new_name)];
        let body = self
            .exchange(Method::Get, "/lists/rename", params, None)
            .await?;
        let update = self.read_update(&body).await?;
        self.list_cache.temporary.lock().remove(old_name);
        Ok(update.list)
    }

    /// Deletes the named lists. Names of lists that don't exist are skipped.
    ///
    /// Returns how many lists were deleted.
    pub async fn delete_lists<I, S>(&self, names: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let existing = self.lists().await?;
        let mut deleted = 0;
        for name in names {
            let name = name.as_ref();
            if !existing.contains_key(name) {
                tracing::debug!(list = name, "no such list to delete");
                continue;
            }

            let body = self
                .exchange(Method::Delete, "/lists", vec![param("name", name)], None)
                .await?;
            let response: UpdateResponse = parse_response(&body)?;
            if !response.was_successful {
                return Err(reported_failure(response.error));
            }
            self.list_cache.temporary.lock().remove(name);
            deleted += 1;
        }

        self.refresh_lists().await?;
        Ok(deleted)
    }

    pub async fn delete_list(&self, name: &str) -> Result<bool> {
        Ok(self.delete_lists([name]).await? == 1)
    }

    /// Deletes every list this connection named itself.
    pub async fn delete_temporary_lists(&self) -> Result<usize> {
        let names: Vec<String> = std::mem::take(&mut *self.list_cache.temporary.lock())
            .into_iter()
            .collect();
        self.delete_lists(names).await
    }

    /// A new list of the objects found in every one of `lists`.
    pub async fn intersect<I, S>(&self, lists: I, options: ListOptions) -> Result<ListUpload>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.combine("/lists/intersect", "Intersection", lists, options)
            .await
    }

    /// A new list of the objects found in any of `lists`.
    pub async fn union<I, S>(&self, lists: I, options: ListOptions) -> Result<ListUpload>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.combine("/lists/union", "Union", lists, options).await
    }

    /// A new list of the objects found in exactly one of `lists`.
    pub async fn xor<I, S>(&self, lists: I, options: ListOptions) -> Result<ListUpload>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.combine("/lists/diff", "Difference", lists, options)
            .await
    }

    /// A new list of the objects in `lefts` that are in none of `rights`.
    pub async fn subtract<L, R, S, T>(&self, lefts: L, rights: R, options: ListOptions) -> Result<ListUpload>
    where
        L: IntoIterator<Item = S>,
        R: IntoIterator<Item = T>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        let lefts: Vec<String> = lefts.into_iter().map(|l| String::from(l.as_ref())).collect();
        let rights: Vec<String> = rights.into_iter().map(|r| String::from(r.as_ref())).collect();
        let (name, description) = self
            .name_and_description(options, || {
                format!(
                    "Subtraction of {} from {}",
                    rights.join(" and "),
                    lefts.join(" and ")
                )
            })
            .await?;

        let params = vec![
            param("name", name),
            param("description", description),
            param("references", lefts.join(";")),
            param("subtract", rights.join(";")),
        ];
        let body = self
            .exchange(Method::Get, "/lists/subtract", params, None)
            .await?;
        self.read_update(&body).await
    }

    async fn combine<I, S>(
        &self,
        endpoint: &str,
        operation: &str,
        lists: I,
        options: ListOptions,
    ) -> Result<ListUpload>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: Vec<String> = lists.into_iter().map(|l| String::from(l.as_ref())).collect();
        let (name, description) = self
            .name_and_description(options, || {
                format!("{} of {}", operation, names.join(" and "))
            })
            .await?;

        let params = vec![
            param("name", name),
            param("lists", names.join(";")),
            param("description", description),
        ];
        let body = self.exchange(Method::Get, endpoint, params, None).await?;
        self.read_update(&body).await
    }

    async fn name_and_description<F>(&self, options: ListOptions, description: F) -> Result<(String, String)>
    where
        F: FnOnce() -> String,
    {
        let name = match options.name {
            Some(name) => name,
            None => self.unused_list_name().await?,
        };
        Ok((name, options.description.unwrap_or_else(description)))
    }

    /// The first `my_list_N` not taken yet. It is remembered as temporary.
    async fn unused_list_name(&self) -> Result<String> {
        let lists = self.lists().await?;
        let mut temporary = self.list_cache.temporary.lock();

        let mut counter = 1;
        let mut name = format!("{}{}", DEFAULT_NAME_PREFIX, counter);
        while lists.contains_key(&name) || temporary.contains(&name) {
            counter += 1;
            name = format!("{}{}", DEFAULT_NAME_PREFIX, counter);
        }
        temporary.insert(name.clone());
        Ok(name)
    }

    /// Reads the answer to a list change, then looks the changed list up afresh.
    async fn read_update(&self, body: &[u8]) -> Result<ListUpload> {
        let response: UpdateResponse = parse_response(body)?;
        if !response.was_successful {
            return Err(reported_failure(response.error));
        }
        let name = response.list_name.ok_or_else(|| {
            MalformedResponseSnafu {
                message: "list response names no list",
            }
            .build()
        })?;

        let lists = self.refresh_lists().await?;
        let list = lists
            .get(&name)
            .cloned()
            .ok_or_else(|| UnknownListSnafu { name: name.as_str() }.build())?;
        tracing::debug!(list = %list.name, size = list.size, "list updated");

        Ok(ListUpload {
            list,
            unmatched_identifiers: response.unmatched_identifiers.into_iter().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_quoted_one_per_line() {
        assert_eq!(
            identifier_body(&["Alex", "Gareth Keenan"]),
            "\"Alex\"\n\"Gareth Keenan\""
        );
    }

    #[test]
    fn display() {
        let list = SavedList {
            name: String::from("favourites"),
            title: None,
            description: Some(String::from("Best genes")),
            list_type: String::from("Gene"),
            size: 3,
            date_created: None,
            authorized: true,
            tags: Vec::new(),
        };
        assert_eq!(list.to_string(), "favourites (3 Gene) Best genes");
    }

    #[test]
    fn failure_without_message() {
        let e = reported_failure(None);
        assert!(matches!(e, ClientError::ServerReturnedError { status: 200, .. }));
    }
}
