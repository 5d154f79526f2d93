//! Resolved types and the byte-size query contract described in `spec.md` §6.

use std::rc::Rc;

/// Size, in bytes, of a single stack cell. All loads/stores are word
/// granular; sub-word packing is an explicit non-goal.
pub const WORD: usize = 8;

/// Rounds `bytes` up to the next multiple of [`WORD`].
pub fn word_align(bytes: usize) -> usize {
    (bytes + WORD - 1) / WORD * WORD
}

/// A single field of a [`StructDef`], with its byte offset already resolved.
///
/// # Note
///
/// `spec.md` §9 flags that storing member offsets in bits while memory is
/// word-granular is an unresolved oddity in the source this spec was drawn
/// from. This implementation resolves it by storing offsets in bytes
/// throughout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub ty: Type,
    pub offset: usize,
}

#[derive(Debug, PartialEq, Eq)]
pub struct StructDef {
    pub name: String,
    pub fields: Vec<FieldDef>,
    pub size: usize,
}

impl StructDef {
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// A resolved type, as attached to every expression and declared symbol by
/// the sema pass.
#[derive(Debug, Clone)]
pub enum Type {
    /// The language's only scalar type. Despite the name it occupies a
    /// full word; the source language has no sub-word integers.
    S32,
    Array(Box<Type>, usize),
    Struct(Rc<StructDef>),
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Type::S32, Type::S32) => true,
            (Type::Array(a, na), Type::Array(b, nb)) => na == nb && a == b,
            (Type::Struct(a), Type::Struct(b)) => Rc::ptr_eq(a, b) || a.name == b.name,
            _ => false,
        }
    }
}

impl Eq for Type {}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Type::S32 => write!(f, "s32"),
            Type::Array(elem, n) => write!(f, "{elem}[{n}]"),
            Type::Struct(def) => write!(f, "{}", def.name),
        }
    }
}

impl Type {
    /// `byte_size(type)`: the external-interface query from `spec.md` §6.
    pub fn byte_size(&self) -> usize {
        match self {
            Type::S32 => WORD,
            Type::Array(elem, count) => count * word_align(elem.byte_size()),
            Type::Struct(def) => def.size,
        }
    }
}

/// Builds the resolved [`StructDef`] for a struct declaration whose field
/// types are already resolved, assigning each field a word-aligned byte
/// offset in declaration order.
pub fn layout_struct(name: String, fields: Vec<(String, Type)>) -> StructDef {
    let mut offset = 0usize;
    let mut out = Vec::with_capacity(fields.len());
    for (fname, ty) in fields {
        let size = word_align(ty.byte_size());
        out.push(FieldDef {
            name: fname,
            ty,
            offset,
        });
        offset += size;
    }
    StructDef {
        name,
        fields: out,
        size: offset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_align_rounds_up() {
        assert_eq!(word_align(0), 0);
        assert_eq!(word_align(1), 8);
        assert_eq!(word_align(8), 8);
        assert_eq!(word_align(9), 16);
    }

    #[test]
    fn struct_layout_is_word_aligned_and_sequential() {
        let def = layout_struct(
            "P".into(),
            vec![("a".into(), Type::S32), ("b".into(), Type::S32)],
        );
        assert_eq!(def.field("a").unwrap().offset, 0);
        assert_eq!(def.field("b").unwrap().offset, 8);
        assert_eq!(def.size, 16);
    }

    #[test]
    fn array_size_multiplies_aligned_element_size() {
        let arr = Type::Array(Box::new(Type::S32), 3);
        assert_eq!(arr.byte_size(), 24);
    }
}
