use alloc::string::String;
use core::fmt;
use thiserror::Error;

pub type Result<T> = core::result::Result<T, Fat32Error>;

/// Cause d'un échec de lecture de secteur
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoFault {
    /// Secteur au-delà de la fin du device
    OutOfRange,
    /// Le buffer ne correspond pas au nombre de secteurs demandé
    BufferSize,
    /// Le support a signalé une erreur
    Medium,
}

impl fmt::Display for IoFault {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::OutOfRange => write!(f, "secteur hors limites"),
            Self::BufferSize => write!(f, "taille de buffer incorrecte"),
            Self::Medium => write!(f, "erreur du support"),
        }
    }
}

/// Les différentes erreurs possibles
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fat32Error {
    #[error("Erreur d'entrée/sortie au secteur {sector}: {fault}")]
    IoError { sector: u64, fault: IoFault },

    #[error("Boot sector invalide: {reason}")]
    InvalidBootSector { reason: &'static str },

    #[error("Numéro de cluster invalide: {cluster}")]
    InvalidCluster { cluster: u32 },

    #[error("Chaîne de clusters corrompue depuis {start} (au cluster {cluster})")]
    CorruptChain { start: u32, cluster: u32 },

    #[error("La chaîne depuis {start} pointe vers un cluster libre après {cluster}")]
    FreeClusterReferenced { start: u32, cluster: u32 },

    #[error("Chemin trop profond (limite {limit}): {path}")]
    PathTooDeep { path: String, limit: usize },

    #[error("Fichier ou dossier non trouvé: {path}")]
    NotFound { path: String },

    #[error("Ce n'est pas un dossier: {path}")]
    NotADirectory { path: String },

    #[error("C'est un dossier: {path}")]
    IsADirectory { path: String },

    #[error("Lecture annulée pendant {path}")]
    Cancelled { path: String },
}

impl Fat32Error {
    /// Erreurs qui ne touchent que le sous-arbre en cours
    pub fn is_subtree_local(&self) -> bool {
        matches!(
            self,
            Self::InvalidCluster { .. }
                | Self::CorruptChain { .. }
                | Self::FreeClusterReferenced { .. }
                | Self::PathTooDeep { .. }
        )
    }
}
