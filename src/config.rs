//! Réglages du parcours de l'arbre

use core::sync::atomic::{AtomicBool, Ordering};

/// Niveaux de dossiers sous la racine. Un chemin FAT32 de 260 caractères
/// n'en contient pas plus de la moitié environ.
pub const DEFAULT_MAX_DEPTH: usize = 128;

/// Que faire quand un sous-arbre ne peut pas être lu
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Échec du parcours entier
    #[default]
    Abort,
    /// Omettre le sous-arbre et le signaler à côté de l'arbre.
    /// Les erreurs du device arrêtent toujours le parcours.
    SkipSubtree,
}

#[derive(Debug, Clone, Copy)]
pub struct TreeConfig<'a> {
    pub max_depth: usize,
    pub on_error: ErrorPolicy,
    /// Consulté entre deux clusters de dossier
    pub cancel: Option<&'a AtomicBool>,
}

impl Default for TreeConfig<'_> {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            on_error: ErrorPolicy::Abort,
            cancel: None,
        }
    }
}

impl<'a> TreeConfig<'a> {
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_policy(mut self, on_error: ErrorPolicy) -> Self {
        self.on_error = on_error;
        self
    }

    pub fn with_cancel(mut self, flag: &'a AtomicBool) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}
