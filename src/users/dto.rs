use std::collections::HashMap;

use serde::Serialize;
use uuid::Uuid;

use crate::users::repo_types::{PageRequest, Role, User, UserFilter};

/// Public part of the user returned to clients.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub avatar: Option<String>,
    pub bio: Option<String>,
    pub role: Role,
    pub online: bool,
    pub active: bool,
}

impl From<&User> for PublicUser {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            full_name: u.full_name.clone(),
            email: u.email.clone(),
            phone: u.phone.clone(),
            avatar: u.avatar.clone(),
            bio: u.bio.clone(),
            role: u.role,
            online: u.online,
            active: u.active,
        }
    }
}

/// What another user may see of a profile.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileView {
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub bio: Option<String>,
}

impl From<&User> for ProfileView {
    fn from(u: &User) -> Self {
        Self {
            full_name: u.full_name.clone(),
            email: u.email.clone(),
            phone: u.phone.clone(),
            bio: u.bio.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub docs: Vec<T>,
    pub total_docs: i64,
    pub limit: i64,
    pub page: i64,
    pub total_pages: i64,
}

impl<T> Page<T> {
    pub fn new(docs: Vec<T>, total_docs: i64, req: PageRequest) -> Self {
        let total_pages = if total_docs == 0 {
            0
        } else {
            (total_docs + req.limit - 1) / req.limit
        };
        Self {
            docs,
            total_docs,
            limit: req.limit,
            page: req.page,
            total_pages,
        }
    }
}

pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

/// Splits listing query parameters into filter and page. Unparseable
/// values are ignored rather than rejected.
pub fn parse_list_query(query: &HashMap<String, String>) -> (UserFilter, PageRequest) {
    let filter = UserFilter {
        role: query.get("role").and_then(|r| Role::parse(r)),
        active: query.get("active").and_then(|v| parse_bool(v)),
        online: query.get("online").and_then(|v| parse_bool(v)),
        email: query.get("email").cloned(),
        phone: query.get("phone").cloned(),
    };
    let page = PageRequest {
        page: query
            .get("page")
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|p| *p >= 1)
            .unwrap_or(1),
        limit: query
            .get("limit")
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|l| *l >= 1)
            .map(|l| l.min(PageRequest::MAX_LIMIT))
            .unwrap_or(PageRequest::DEFAULT_LIMIT),
    };
    (filter, page)
}
