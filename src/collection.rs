//! In-memory REST collection of JSON objects.
//!
//! For a collection named `persons` the routes are:
//!
//! | method   | path            | effect                                   |
//! |----------|-----------------|------------------------------------------|
//! | `GET`    | `/persons`      | array of all items, ascending id         |
//! | `PUT`    | `/persons`      | replace all items (items need an `id`)   |
//! | `POST`   | `/persons`      | create, `201` + `Location: /persons/<id>` |
//! | `DELETE` | `/persons`      | remove all items                         |
//! | `GET`    | `/persons/:id`  | one item or `404`                        |
//! | `PUT`    | `/persons/:id`  | create or replace the item               |
//! | `DELETE` | `/persons/:id`  | remove the item                          |

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;

use crate::buffer::Buffer;
use crate::http::reply::Reply;
use crate::http::request::{Method, Request};
use crate::http::status::{HandlerResult, Status};
use crate::router::{RouteError, RoutesMap};

const JSON: &str = "application/json";

#[derive(Debug, Default)]
struct Store {
    items: Mutex<BTreeMap<u64, Value>>,
    last_id: AtomicU64,
}

impl Store {
    fn items(&self) -> MutexGuard<'_, BTreeMap<u64, Value>> {
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// `CONFLICT` once the id space is used up.
    fn next_id(&self) -> Result<u64, Status> {
        self.last_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| last.checked_add(1))
            .map(|last| last + 1)
            .map_err(|_| Status::CONFLICT)
    }

    fn saw_id(&self, id: u64) {
        self.last_id.fetch_max(id, Ordering::SeqCst);
    }
}

/// Cheap to clone; clones share the same items.
#[derive(Debug, Clone)]
pub struct JsonCollection {
    name: String,
    store: Arc<Store>,
}

impl JsonCollection {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.trim_matches('/').to_string(),
            store: Arc::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `/<name>`
    pub fn path(&self) -> String {
        format!("/{}", self.name)
    }

    pub fn len(&self) -> usize {
        self.store.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.items().is_empty()
    }

    pub fn get(&self, id: u64) -> Option<Value> {
        self.store.items().get(&id).cloned()
    }

    /// Stores `value` under a fresh id and returns the id.
    pub fn insert(&self, value: Value) -> Result<u64, Status> {
        if !value.is_object() {
            return Err(Status::BAD_REQUEST);
        }
        let id = self.store.next_id()?;
        let value = with_id(value, id)?;
        self.store.items().insert(id, value);
        Ok(id)
    }

    pub fn values(&self) -> Vec<Value> {
        self.store.items().values().cloned().collect()
    }

    pub fn register(&self, routes: &mut RoutesMap) -> Result<(), RouteError> {
        let base = self.path();
        let item = format!("{base}/:id");

        let c = self.clone();
        routes.add(Method::GET).path(&base)?.to(move |_, _, rep| c.list(rep));
        let c = self.clone();
        routes.add(Method::PUT).path(&base)?.to(move |req, body, _| c.replace_all(req, body));
        let c = self.clone();
        routes.add(Method::POST).path(&base)?.to(move |req, body, rep| c.create(req, body, rep));
        let c = self.clone();
        routes.add(Method::DELETE).path(&base)?.to(move |_, _, _| {
            c.store.items().clear();
            Ok(())
        });

        let c = self.clone();
        routes.add(Method::GET).path(&item)?.to(move |req, _, rep| c.fetch(req, rep));
        let c = self.clone();
        routes.add(Method::PUT).path(&item)?.to(move |req, body, _| c.upsert(req, body));
        let c = self.clone();
        routes.add(Method::DELETE).path(&item)?.to(move |req, _, _| {
            let id = item_id(req)?;
            c.store.items().remove(&id);
            Ok(())
        });

        Ok(())
    }

    fn list(&self, rep: &mut Reply) -> HandlerResult {
        let items = Value::Array(self.values());
        let data = serde_json::to_vec(&items)?;
        rep.set_header("Content-Type", JSON).push(data);
        Ok(())
    }

    fn replace_all(&self, req: &Request, body: &mut Buffer) -> HandlerResult {
        let data = request_body(req, body)?;
        let Value::Array(values) = serde_json::from_slice::<Value>(&data)? else {
            return Err(Status::BAD_REQUEST.into());
        };

        let mut keep = Vec::with_capacity(values.len());
        for value in values {
            let Some(id) = value.get("id").and_then(json_id) else {
                continue;
            };
            keep.push((explicit_id(id)?, value));
        }

        let mut items = self.store.items();
        items.clear();
        for (id, value) in keep {
            self.store.saw_id(id);
            items.insert(id, value);
        }

        Ok(())
    }

    fn create(&self, req: &Request, body: &mut Buffer, rep: &mut Reply) -> HandlerResult {
        let data = request_body(req, body)?;
        let value = serde_json::from_slice::<Value>(&data)?;
        let id = self.insert(value)?;

        rep.set_status(Status::CREATED)
            .set_header("Location", format!("{}/{}", self.path(), id));
        Ok(())
    }

    fn fetch(&self, req: &Request, rep: &mut Reply) -> HandlerResult {
        let id = item_id(req)?;
        let value = self.get(id).ok_or(Status::NOT_FOUND)?;
        let data = serde_json::to_vec(&value)?;
        rep.set_header("Content-Type", JSON).push(data);
        Ok(())
    }

    fn upsert(&self, req: &Request, body: &mut Buffer) -> HandlerResult {
        let id = explicit_id(item_id(req)?)?;
        let data = request_body(req, body)?;
        let value = with_id(serde_json::from_slice::<Value>(&data)?, id)?;

        self.store.saw_id(id);
        self.store.items().insert(id, value);
        Ok(())
    }
}

fn request_body(req: &Request, body: &mut Buffer) -> Result<bytes::Bytes, Status> {
    let data = body.take_front(req.content_length());
    if data.is_empty() {
        return Err(Status::BAD_REQUEST);
    }
    Ok(data)
}

fn item_id(req: &Request) -> Result<u64, Status> {
    req.attr("id")
        .and_then(|id| id.parse().ok())
        .ok_or(Status::BAD_REQUEST)
}

/// Client-chosen ids must leave room for the generator.
fn explicit_id(id: u64) -> Result<u64, Status> {
    if id == u64::MAX {
        return Err(Status::BAD_REQUEST);
    }
    Ok(id)
}

/// Ids are numbers, or strings holding a number.
fn json_id(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn with_id(mut value: Value, id: u64) -> Result<Value, Status> {
    let Some(object) = value.as_object_mut() else {
        return Err(Status::BAD_REQUEST);
    };
    object.insert("id".to_string(), Value::from(id));
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ids_are_sequential() {
        let c = JsonCollection::new("persons");
        assert_eq!(c.insert(json!({"name": "a"})), Ok(1));
        assert_eq!(c.insert(json!({"name": "b"})), Ok(2));
        assert_eq!(c.get(2), Some(json!({"name": "b", "id": 2})));
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn non_objects_are_rejected() {
        let c = JsonCollection::new("/things/");
        assert_eq!(c.path(), "/things");
        assert_eq!(c.insert(json!([1, 2])), Err(Status::BAD_REQUEST));
    }

    #[test]
    fn rejected_values_do_not_use_ids() {
        let c = JsonCollection::new("persons");
        assert_eq!(c.insert(json!("not an object")), Err(Status::BAD_REQUEST));
        assert_eq!(c.insert(json!({})), Ok(1));
    }

    #[test]
    fn exhausted_ids_conflict() {
        let c = JsonCollection::new("persons");
        c.store.saw_id(u64::MAX - 1);
        assert_eq!(c.insert(json!({})), Ok(u64::MAX));
        assert_eq!(c.insert(json!({})), Err(Status::CONFLICT));
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn json_ids() {
        assert_eq!(json_id(&json!(7)), Some(7));
        assert_eq!(json_id(&json!("12")), Some(12));
        assert_eq!(json_id(&json!("x")), None);
        assert_eq!(json_id(&json!(-1)), None);
    }
}
