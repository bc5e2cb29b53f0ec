//! Package tree and import groups.
//!
//! Every model element lives in a package addressed by a `::`-separated path
//! (`meta::pure::functions::collection`). The root package has the empty
//! path. A call site sees a function when the function's package is the
//! root, is listed in the call site's [`ImportGroup`], or belongs to the
//! core imports carried by the [`PackageTree`].

use rustc_hash::FxHashMap;
use serde::Serialize;

pub const SEPARATOR: &str = "::";

/// Packages that every call site imports implicitly.
pub const CORE_IMPORTS: &[&str] = &[
    "meta::pure::functions::boolean",
    "meta::pure::functions::collection",
    "meta::pure::functions::lang",
    "meta::pure::functions::meta",
    "meta::pure::functions::multiplicity",
    "meta::pure::functions::relation",
    "meta::pure::metamodel::relation",
    "meta::pure::metamodel::type",
    "meta::pure::milestoning",
];

/// A unique identifier for a package within a [`PackageTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PackageId(pub u32);

#[derive(Debug, Clone)]
pub struct PackageInfo {
    pub id: PackageId,
    /// Last path segment; empty for the root.
    pub name: String,
    /// Full user path; empty for the root.
    pub path: String,
    pub parent: Option<PackageId>,
    pub children: Vec<PackageId>,
}

/// Split an element path into its package path and simple name.
///
/// `meta::pure::functions::collection::map` splits into
/// `("meta::pure::functions::collection", "map")`; a bare name has the
/// root package.
pub fn split_path(path: &str) -> (&str, &str) {
    match path.rfind(SEPARATOR) {
        Some(i) => (&path[..i], &path[i + SEPARATOR.len()..]),
        None => ("", path),
    }
}

/// Join a package path and a simple name into an element path.
pub fn user_path(package: &str, name: &str) -> String {
    if package.is_empty() {
        name.to_string()
    } else {
        format!("{package}{SEPARATOR}{name}")
    }
}

/// The set of package paths imported by one compilation unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportGroup {
    pub name: String,
    imports: Vec<String>,
}

impl ImportGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            imports: Vec::new(),
        }
    }

    /// Builder form of [`ImportGroup::add`].
    pub fn with(mut self, path: impl Into<String>) -> Self {
        self.add(path);
        self
    }

    /// Import a package. Duplicate imports are ignored.
    pub fn add(&mut self, path: impl Into<String>) {
        let path = path.into();
        if !self.imports.contains(&path) {
            self.imports.push(path);
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.imports.iter().any(|p| p == path)
    }

    pub fn imports(&self) -> &[String] {
        &self.imports
    }

    pub fn is_empty(&self) -> bool {
        self.imports.is_empty()
    }
}

/// The package hierarchy plus the core import group.
#[derive(Debug, Clone)]
pub struct PackageTree {
    packages: Vec<PackageInfo>,
    path_to_id: FxHashMap<String, PackageId>,
    core: ImportGroup,
}

impl PackageTree {
    /// A tree holding only the root package, with the standard core imports.
    pub fn new() -> Self {
        let root = PackageInfo {
            id: PackageId(0),
            name: String::new(),
            path: String::new(),
            parent: None,
            children: Vec::new(),
        };
        let mut path_to_id = FxHashMap::default();
        path_to_id.insert(String::new(), PackageId(0));
        let core = CORE_IMPORTS
            .iter()
            .fold(ImportGroup::new("coreImport"), |group, path| group.with(*path));
        Self {
            packages: vec![root],
            path_to_id,
            core,
        }
    }

    pub fn root(&self) -> PackageId {
        PackageId(0)
    }

    /// Return the id for `path`, creating it and any missing ancestors.
    pub fn ensure(&mut self, path: &str) -> PackageId {
        if let Some(&id) = self.path_to_id.get(path) {
            return id;
        }
        let (parent_path, name) = split_path(path);
        let parent = self.ensure(parent_path);
        let id = PackageId(self.packages.len() as u32);
        self.packages.push(PackageInfo {
            id,
            name: name.to_string(),
            path: path.to_string(),
            parent: Some(parent),
            children: Vec::new(),
        });
        self.packages[parent.0 as usize].children.push(id);
        self.path_to_id.insert(path.to_string(), id);
        id
    }

    pub fn resolve(&self, path: &str) -> Option<PackageId> {
        self.path_to_id.get(path).copied()
    }

    pub fn get(&self, id: PackageId) -> &PackageInfo {
        &self.packages[id.0 as usize]
    }

    pub fn path(&self, id: PackageId) -> &str {
        &self.get(id).path
    }

    pub fn package_count(&self) -> usize {
        self.packages.len()
    }

    pub fn is_core(&self, id: PackageId) -> bool {
        self.core.contains(self.path(id))
    }

    /// Whether `id` is the root package or listed in `imports`.
    pub fn is_imported(&self, id: PackageId, imports: &ImportGroup) -> bool {
        id == self.root() || imports.contains(self.path(id))
    }

    /// Whether elements of package `id` are visible from a call site that
    /// imports `imports`.
    pub fn is_visible(&self, id: PackageId, imports: &ImportGroup) -> bool {
        self.is_imported(id, imports) || self.is_core(id)
    }
}

impl Default for PackageTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_creates_ancestors() {
        let mut tree = PackageTree::new();
        let id = tree.ensure("trading::model::product");
        assert_eq!(tree.path(id), "trading::model::product");
        assert_eq!(tree.get(id).name, "product");

        let parent = tree.get(id).parent.unwrap();
        assert_eq!(tree.path(parent), "trading::model");
        assert_eq!(tree.resolve("trading"), Some(tree.get(parent).parent.unwrap()));
        assert_eq!(tree.package_count(), 4);
    }

    #[test]
    fn ensure_is_idempotent() {
        let mut tree = PackageTree::new();
        let a = tree.ensure("a::b");
        let b = tree.ensure("a::b");
        assert_eq!(a, b);
        assert_eq!(tree.get(tree.resolve("a").unwrap()).children, vec![a]);
    }

    #[test]
    fn split_and_join() {
        assert_eq!(
            split_path("meta::pure::functions::collection::map"),
            ("meta::pure::functions::collection", "map")
        );
        assert_eq!(split_path("f"), ("", "f"));
        assert_eq!(user_path("", "f"), "f");
        assert_eq!(user_path("a::b", "f"), "a::b::f");
    }

    #[test]
    fn visibility() {
        let mut tree = PackageTree::new();
        let user = tree.ensure("trading::functions");
        let core = tree.ensure("meta::pure::functions::collection");
        let hidden = tree.ensure("other::lib");
        let imports = ImportGroup::new("unit").with("trading::functions");

        assert!(tree.is_visible(tree.root(), &imports));
        assert!(tree.is_visible(user, &imports));
        assert!(tree.is_visible(core, &imports));
        assert!(!tree.is_visible(hidden, &imports));

        assert!(tree.is_core(core));
        assert!(!tree.is_imported(core, &imports));
    }

    #[test]
    fn duplicate_imports_are_ignored() {
        let mut group = ImportGroup::new("unit");
        group.add("a");
        group.add("a");
        assert_eq!(group.imports(), ["a".to_string()]);
        assert!(!group.is_empty());
    }
}
