//! Path trie used for request dispatch.
//!
//! Each node holds static children keyed by segment, at most one `:param`
//! child and the handles registered per HTTP method. Lookups prefer static
//! segments and fall back to the parameter child when the static branch
//! does not lead to a match.

use std::collections::HashMap;
use std::fmt;

use http::Method;

use crate::errors::RouteError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteParam {
    pub key: String,
    pub value: String,
}

#[derive(Debug)]
pub struct RouteMatch<'a, H> {
    pub handle: &'a H,
    pub params: Vec<RouteParam>,
}

struct ParamChild<H> {
    name: String,
    node: Node<H>,
}

struct Node<H> {
    statics: HashMap<String, Node<H>>,
    param: Option<Box<ParamChild<H>>>,
    handles: HashMap<Method, H>,
}

impl<H> Default for Node<H> {
    fn default() -> Self {
        Self {
            statics: HashMap::new(),
            param: None,
            handles: HashMap::new(),
        }
    }
}

pub struct Router<H> {
    root: Node<H>,
    len: usize,
}

impl<H> Default for Router<H> {
    fn default() -> Self {
        Self {
            root: Node::default(),
            len: 0,
        }
    }
}

impl<H> fmt::Debug for Router<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router").field("routes", &self.len).finish()
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

fn canonical(path: &str) -> String {
    segments(path).collect::<Vec<_>>().join("/")
}

/// Canonical `/a/b` form of a route path; the empty path becomes `/`.
pub fn display_path(path: &str) -> String {
    format!("/{}", canonical(path))
}

impl<H> Router<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Registers `handle` for `method` at `path`. Segments starting with `:`
    /// capture a parameter.
    pub fn on(&mut self, method: Method, path: &str, handle: H) -> Result<(), RouteError> {
        let mut node = &mut self.root;
        for seg in segments(path) {
            node = match seg.strip_prefix(':') {
                Some(name) => {
                    let child = node.param.get_or_insert_with(|| {
                        Box::new(ParamChild {
                            name: name.to_string(),
                            node: Node::default(),
                        })
                    });
                    if child.name != name {
                        return Err(RouteError::ParamConflict {
                            path: canonical(path),
                            name: name.to_string(),
                            existing: child.name.clone(),
                        });
                    }
                    &mut child.node
                }
                None => node.statics.entry(seg.to_string()).or_default(),
            };
        }

        if node.handles.contains_key(&method) {
            return Err(RouteError::Duplicate {
                method,
                path: canonical(path),
            });
        }
        node.handles.insert(method, handle);
        self.len += 1;
        Ok(())
    }

    /// Finds the handle for `method` at `path`. Parameter values are
    /// percent-decoded; a value that is not valid UTF-8 after decoding is
    /// passed through unchanged.
    pub fn find(&self, method: &Method, path: &str) -> Option<RouteMatch<'_, H>> {
        let segs: Vec<&str> = segments(path).collect();
        let mut captured = Vec::new();
        let handle = Self::walk(&self.root, &segs, method, &mut captured)?;
        let params = captured
            .into_iter()
            .map(|(key, raw)| RouteParam {
                key: key.to_string(),
                value: urlencoding::decode(raw)
                    .map(|v| v.into_owned())
                    .unwrap_or_else(|_| raw.to_string()),
            })
            .collect();
        Some(RouteMatch { handle, params })
    }

    fn walk<'a, 'p>(
        node: &'a Node<H>,
        segs: &[&'p str],
        method: &Method,
        captured: &mut Vec<(&'a str, &'p str)>,
    ) -> Option<&'a H> {
        let Some((head, rest)) = segs.split_first() else {
            return node.handles.get(method);
        };

        if let Some(child) = node.statics.get(*head) {
            if let Some(found) = Self::walk(child, rest, method, captured) {
                return Some(found);
            }
        }

        let param = node.param.as_ref()?;
        captured.push((param.name.as_str(), *head));
        match Self::walk(&param.node, rest, method, captured) {
            Some(found) => Some(found),
            None => {
                captured.pop();
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router(routes: &[(Method, &str, &'static str)]) -> Router<&'static str> {
        let mut r = Router::new();
        for (m, p, h) in routes {
            r.on(m.clone(), p, *h).unwrap();
        }
        r
    }

    #[test]
    fn static_and_param_lookup() {
        let r = router(&[
            (Method::GET, "api/users", "list"),
            (Method::GET, "api/users/:id", "one"),
            (Method::POST, "api/users", "create"),
            (Method::GET, "", "index"),
        ]);

        assert_eq!(r.find(&Method::GET, "/api/users").map(|m| *m.handle), Some("list"));
        assert_eq!(r.find(&Method::POST, "/api/users").map(|m| *m.handle), Some("create"));
        assert_eq!(r.find(&Method::GET, "/").map(|m| *m.handle), Some("index"));

        let m = r.find(&Method::GET, "/api/users/42").unwrap();
        assert_eq!(*m.handle, "one");
        assert_eq!(
            m.params,
            vec![RouteParam {
                key: "id".into(),
                value: "42".into()
            }]
        );

        assert!(r.find(&Method::DELETE, "/api/users").is_none());
        assert!(r.find(&Method::GET, "/api/users/42/extra").is_none());
        assert_eq!(r.len(), 4);
    }

    #[test]
    fn static_segment_wins_then_backtracks_to_param() {
        let r = router(&[
            (Method::GET, "files/latest", "latest"),
            (Method::GET, "files/:name", "by-name"),
            (Method::GET, "files/:name/meta", "meta"),
        ]);
        assert_eq!(r.find(&Method::GET, "/files/latest").map(|m| *m.handle), Some("latest"));
        assert_eq!(r.find(&Method::GET, "/files/other").map(|m| *m.handle), Some("by-name"));

        let m = r.find(&Method::GET, "/files/latest/meta").unwrap();
        assert_eq!(*m.handle, "meta");
        assert_eq!(m.params[0].value, "latest");
    }

    #[test]
    fn params_are_percent_decoded() {
        let r = router(&[(Method::GET, "tags/:tag", "tag")]);
        let m = r.find(&Method::GET, "/tags/hello%20world").unwrap();
        assert_eq!(m.params[0].value, "hello world");
    }

    #[test]
    fn duplicate_method_and_path_is_rejected() {
        let mut r = router(&[(Method::GET, "a/:id", "x")]);
        let err = r.on(Method::GET, "a/:id", "y").unwrap_err();
        assert!(matches!(err, RouteError::Duplicate { .. }));
        assert_eq!(err.to_string(), "route GET /a/:id is already registered");
        r.on(Method::PUT, "a/:id", "z").unwrap();
    }

    #[test]
    fn conflicting_param_names_are_rejected() {
        let mut r = router(&[(Method::GET, "a/:id", "x")]);
        let err = r.on(Method::GET, "a/:key/b", "y").unwrap_err();
        assert!(matches!(err, RouteError::ParamConflict { ref name, ref existing, .. } if name == "key" && existing == "id"));
    }

    #[test]
    fn display_path_normalizes_slashes() {
        assert_eq!(display_path(""), "/");
        assert_eq!(display_path("a//b/"), "/a/b");
    }
}
