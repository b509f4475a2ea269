//! Language metadata and the per-type node class table.

use std::cell::OnceCell;
use std::fmt;
use std::rc::Rc;

use graft_core::utils::{field_accessor_name, node_class_name};
use graft_core::{NodeFieldId, NodeKind, NodeTypeId, RawNode};
use tracing::debug;

use crate::engine::Engine;
use crate::native::{LanguageId, LanguageTables};

/// Name of the class shared by every node type without its own accessors.
pub const GENERIC_CLASS_NAME: &str = "SyntaxNode";

/// One field accessor of a specialized node class.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldAccessor {
    pub field_name: String,
    pub field_id: NodeFieldId,
    /// Repeated fields return every child with that field.
    pub multiple: bool,
    /// `<field>_node` or `<field>_nodes`.
    pub accessor: String,
}

impl FieldAccessor {
    fn new(field_name: &str, field_id: NodeFieldId, multiple: bool) -> Self {
        Self {
            field_name: field_name.to_owned(),
            field_id,
            multiple,
            accessor: field_accessor_name(field_name, multiple),
        }
    }
}

/// Dispatch descriptor for nodes of one grammar type.
///
/// Field ids are resolved once here, so field access on a node never pays a
/// name → id lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeClass {
    name: String,
    type_name: Option<String>,
    /// Sorted by accessor name.
    fields: Vec<FieldAccessor>,
}

impl NodeClass {
    fn generic() -> Self {
        Self {
            name: GENERIC_CLASS_NAME.to_owned(),
            type_name: None,
            fields: Vec::new(),
        }
    }

    /// `PascalCase(type) + "Node"`, or `SyntaxNode` for the generic class.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The grammar type this class was built for.
    pub fn type_name(&self) -> Option<&str> {
        self.type_name.as_deref()
    }

    pub fn is_generic(&self) -> bool {
        self.type_name.is_none()
    }

    pub fn fields(&self) -> &[FieldAccessor] {
        &self.fields
    }

    pub fn accessor_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.accessor.as_str())
    }

    pub fn field(&self, field_name: &str) -> Option<&FieldAccessor> {
        self.fields.iter().find(|f| f.field_name == field_name)
    }

    pub fn accessor(&self, accessor: &str) -> Option<&FieldAccessor> {
        self.fields.iter().find(|f| f.accessor == accessor)
    }
}

struct ClassTable {
    generic: Rc<NodeClass>,
    /// Indexed by node type id.
    by_type: Vec<Rc<NodeClass>>,
}

/// A grammar loaded into an engine.
#[derive(Clone)]
pub struct Language(Rc<LanguageInner>);

struct LanguageInner {
    engine: Engine,
    id: LanguageId,
    kinds: Vec<NodeKind>,
    fields: Vec<Option<String>>,
    node_types: Vec<RawNode>,
    classes: OnceCell<ClassTable>,
}

impl Language {
    pub(crate) fn new(engine: Engine, id: LanguageId, tables: LanguageTables) -> Self {
        let LanguageTables {
            kinds,
            fields,
            node_types,
        } = tables;
        Self(Rc::new(LanguageInner {
            engine,
            id,
            kinds,
            fields,
            node_types,
            classes: OnceCell::new(),
        }))
    }

    pub fn id(&self) -> LanguageId {
        self.0.id
    }

    pub fn engine(&self) -> &Engine {
        &self.0.engine
    }

    pub fn node_type_count(&self) -> usize {
        self.0.kinds.len()
    }

    pub fn field_count(&self) -> usize {
        self.0.fields.len().saturating_sub(1)
    }

    pub fn node_kind(&self, type_id: NodeTypeId) -> Option<&NodeKind> {
        self.0.kinds.get(type_id as usize)
    }

    pub fn node_type_for_id(&self, type_id: NodeTypeId) -> Option<&str> {
        self.node_kind(type_id).map(|kind| kind.name.as_str())
    }

    /// Id of the type with this name, preferring a visible symbol.
    pub fn id_for_node_type(&self, name: &str, named: bool) -> Option<NodeTypeId> {
        let mut fallback = None;
        for (id, kind) in self.0.kinds.iter().enumerate() {
            if kind.name != name || kind.named != named {
                continue;
            }
            if kind.visible {
                return NodeTypeId::try_from(id).ok();
            }
            fallback.get_or_insert(id);
        }
        fallback.and_then(|id| NodeTypeId::try_from(id).ok())
    }

    pub fn field_name_for_id(&self, field_id: NodeFieldId) -> Option<&str> {
        self.0.fields.get(field_id.get() as usize)?.as_deref()
    }

    pub fn field_id_for_name(&self, name: &str) -> Option<NodeFieldId> {
        let index = self
            .0
            .fields
            .iter()
            .position(|field| field.as_deref() == Some(name))?;
        NodeFieldId::new(u16::try_from(index).ok()?)
    }

    /// `node-types.json` descriptors the language shipped with.
    pub fn node_types(&self) -> &[RawNode] {
        &self.0.node_types
    }

    /// The class for nodes of `type_id`; generic when the type has no
    /// specialized accessors.
    pub fn node_class(&self, type_id: NodeTypeId) -> Rc<NodeClass> {
        let table = self.classes();
        table
            .by_type
            .get(type_id as usize)
            .unwrap_or(&table.generic)
            .clone()
    }

    pub fn generic_class(&self) -> Rc<NodeClass> {
        self.classes().generic.clone()
    }

    /// Force construction of the class table.
    pub(crate) fn initialize_classes(&self) {
        self.classes();
    }

    pub fn ptr_eq(&self, other: &Language) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn classes(&self) -> &ClassTable {
        self.0.classes.get_or_init(|| self.build_classes())
    }

    fn build_classes(&self) -> ClassTable {
        let generic = Rc::new(NodeClass::generic());
        let mut specialized = 0usize;

        let by_type = self
            .0
            .kinds
            .iter()
            .map(|kind| {
                if !kind.is_regular() {
                    return generic.clone();
                }
                let Some(info) = self
                    .0
                    .node_types
                    .iter()
                    .find(|info| info.named && info.type_name == kind.name)
                else {
                    return generic.clone();
                };

                let mut fields: Vec<FieldAccessor> = info
                    .fields
                    .iter()
                    .filter_map(|(field_name, cardinality)| {
                        let field_id = self.field_id_for_name(field_name)?;
                        Some(FieldAccessor::new(field_name, field_id, cardinality.multiple))
                    })
                    .collect();
                fields.sort_by(|a, b| a.accessor.cmp(&b.accessor));

                specialized += 1;
                Rc::new(NodeClass {
                    name: node_class_name(&kind.name),
                    type_name: Some(kind.name.clone()),
                    fields,
                })
            })
            .collect();

        debug!(
            language = self.0.id.get(),
            node_types = self.0.kinds.len(),
            specialized,
            "built node class table"
        );
        ClassTable { generic, by_type }
    }
}

impl PartialEq for Language {
    fn eq(&self, other: &Self) -> bool {
        self.0.engine.ptr_eq(&other.0.engine) && self.0.id == other.0.id
    }
}

impl Eq for Language {}

impl fmt::Debug for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Language")
            .field("id", &self.0.id)
            .field("node_types", &self.0.kinds.len())
            .field("fields", &self.field_count())
            .finish()
    }
}
