//! La valeur rendue à l'appelant : un arbre fermé de File/Dir.
//!
//! [`mount`] et [`tree`] suffisent à un hôte. `tree` consomme le volume
//! monté, rien d'interne ne survit à la remise.

use alloc::string::String;
use alloc::vec::Vec;

use crate::filesystem::Fat32FileSystem;
use crate::tree::{Dir, File};
use crate::{BlockDevice, Result};

/// Discriminant d'un [`Tag`], stable à la frontière
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagType {
    File = 0,
    Dir = 1,
}

impl From<TagType> for u8 {
    fn from(tag: TagType) -> u8 {
        tag as u8
    }
}

impl TryFrom<u8> for TagType {
    type Error = u8;

    fn try_from(value: u8) -> core::result::Result<Self, u8> {
        match value {
            0 => Ok(Self::File),
            1 => Ok(Self::Dir),
            other => Err(other),
        }
    }
}

/// Nœud possédé de l'arbre construit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tag {
    File(File),
    Dir(Dir),
}

impl Tag {
    pub fn tag_type(&self) -> TagType {
        match self {
            Self::File(_) => TagType::File,
            Self::Dir(_) => TagType::Dir,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::File(file) => &file.name,
            Self::Dir(dir) => &dir.name,
        }
    }

    pub fn view(&self) -> TagRef<'_> {
        match self {
            Self::File(file) => TagRef::File(file),
            Self::Dir(dir) => TagRef::Dir(dir),
        }
    }

    pub fn into_dir(self) -> Option<Dir> {
        match self {
            Self::Dir(dir) => Some(dir),
            Self::File(_) => None,
        }
    }

    pub fn into_file(self) -> Option<File> {
        match self {
            Self::File(file) => Some(file),
            Self::Dir(_) => None,
        }
    }
}

impl From<File> for Tag {
    fn from(file: File) -> Self {
        Self::File(file)
    }
}

impl From<Dir> for Tag {
    fn from(dir: Dir) -> Self {
        Self::Dir(dir)
    }
}

/// Vue empruntée d'un nœud
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagRef<'a> {
    File(&'a File),
    Dir(&'a Dir),
}

impl<'a> TagRef<'a> {
    pub fn tag_type(&self) -> TagType {
        match self {
            Self::File(_) => TagType::File,
            Self::Dir(_) => TagType::Dir,
        }
    }

    pub fn name(&self) -> &'a str {
        match *self {
            Self::File(file) => &file.name,
            Self::Dir(dir) => &dir.name,
        }
    }
}

/// Itérateur préfixe sur les nœuds sous un dossier. Dans un dossier, les
/// fichiers passent avant les sous-dossiers.
pub struct Walk<'a> {
    stack: Vec<(String, usize, TagRef<'a>)>,
}

impl<'a> Walk<'a> {
    pub(crate) fn new(root: &'a Dir) -> Self {
        let mut walk = Self { stack: Vec::new() };
        walk.push_children("", 0, root);
        walk
    }

    fn push_children(&mut self, path: &str, depth: usize, dir: &'a Dir) {
        let dirs = dir.dirs.iter().rev().map(TagRef::Dir);
        let files = dir.files.iter().rev().map(TagRef::File);
        for node in dirs.chain(files) {
            let mut child = String::from(path);
            child.push('/');
            child.push_str(node.name());
            self.stack.push((child, depth, node));
        }
    }
}

impl<'a> Iterator for Walk<'a> {
    /// Chemin depuis la racine du parcours, profondeur (0 pour les enfants directs), nœud
    type Item = (String, usize, TagRef<'a>);

    fn next(&mut self) -> Option<Self::Item> {
        let (path, depth, node) = self.stack.pop()?;
        if let TagRef::Dir(dir) = node {
            self.push_children(&path, depth + 1, dir);
        }
        Some((path, depth, node))
    }
}

/// Monter le volume FAT32 au début de `device`
pub fn mount<D: BlockDevice>(device: D) -> Result<Fat32FileSystem<D>> {
    Fat32FileSystem::new(device)
}

/// Construire l'arbre complet et libérer le volume
pub fn tree<D: BlockDevice>(fs: Fat32FileSystem<D>) -> Result<Dir> {
    fs.root()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn sample() -> Dir {
        Dir {
            name: "/".into(),
            files: vec![File {
                name: "A.TXT".into(),
                size: 10,
                first_cluster: 3,
            }],
            dirs: vec![Dir {
                name: "SUB".into(),
                files: vec![File {
                    name: "B.TXT".into(),
                    size: 5,
                    first_cluster: 5,
                }],
                dirs: vec![],
            }],
        }
    }

    #[test]
    fn test_discriminants() {
        assert_eq!(u8::from(TagType::File), 0);
        assert_eq!(u8::from(TagType::Dir), 1);
        assert_eq!(TagType::try_from(1), Ok(TagType::Dir));
        assert_eq!(TagType::try_from(2), Err(2));
    }

    #[test]
    fn test_tag_accessors() {
        let tag = Tag::from(sample());
        assert_eq!(tag.tag_type(), TagType::Dir);
        assert_eq!(tag.name(), "/");
        assert_eq!(tag.view().tag_type(), TagType::Dir);
        let dir = tag.into_dir().unwrap();
        let file = Tag::from(dir.files[0].clone());
        assert_eq!(file.tag_type(), TagType::File);
        assert!(file.into_dir().is_none());
    }

    #[test]
    fn test_walk_order() {
        let root = sample();
        let seen: Vec<(String, usize, TagType)> = root
            .walk()
            .map(|(path, depth, node)| (path, depth, node.tag_type()))
            .collect();
        assert_eq!(
            seen,
            vec![
                ("/A.TXT".into(), 0, TagType::File),
                ("/SUB".into(), 0, TagType::Dir),
                ("/SUB/B.TXT".into(), 1, TagType::File),
            ]
        );
    }
}
