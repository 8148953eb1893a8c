//! Lecteur annulable sur fichier mappé en mémoire
//!
//! Chaque ressource prête expose ses octets à travers un [`CancelReader`] :
//! une vue mmap du fichier servie à plusieurs requêtes HTTP concurrentes.
//! L'éviction de la ressource annule le lecteur ; toute lecture ultérieure
//! échoue immédiatement au lieu de servir des octets périmés, ce qui coupe
//! proprement les transferts en cours (vidéos notamment).

use memmap2::Mmap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::io::{AsyncRead, ReadBuf};
use tracing::debug;

/// Erreurs du lecteur annulable.
#[derive(Debug, Error)]
pub enum ReaderError {
    /// Le lecteur a été annulé ; la ressource n'existe plus
    #[error("reader is closed")]
    Closed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<ReaderError> for std::io::Error {
    fn from(err: ReaderError) -> Self {
        match err {
            ReaderError::Closed => {
                std::io::Error::new(std::io::ErrorKind::BrokenPipe, "reader is closed")
            }
            ReaderError::Io(e) => e,
        }
    }
}

/// Vue mmap partagée et annulable sur le fichier d'une ressource.
///
/// Le lecteur lui-même ne porte pas de position : chaque requête obtient un
/// [`ReaderCursor`] indépendant via [`CancelReader::cursor`]. L'annulation
/// est idempotente, libère la vue mappée et fait échouer tous les curseurs.
pub struct CancelReader {
    path: PathBuf,
    len: u64,
    mmap: RwLock<Option<Mmap>>,
    cancelled: AtomicBool,
}

impl CancelReader {
    /// Mappe `path` en mémoire. Échoue si le fichier est introuvable ou
    /// vide (un fichier vide ne peut pas être mappé).
    pub fn open(path: &Path) -> Result<Self, ReaderError> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        // SAFETY: les artefacts du cache ne sont jamais réécrits ni
        // tronqués après leur création, la vue reste donc valide.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self {
            path: path.to_path_buf(),
            len,
            mmap: RwLock::new(Some(mmap)),
            cancelled: AtomicBool::new(false),
        })
    }

    /// Taille du fichier mappé, en octets.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Chemin du fichier sous-jacent.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Copie dans `buf` les octets à partir de `pos`. Retourne le nombre
    /// d'octets copiés, 0 en fin de fichier, [`ReaderError::Closed`] si le
    /// lecteur a été annulé.
    pub fn read_at(&self, pos: u64, buf: &mut [u8]) -> Result<usize, ReaderError> {
        if self.is_cancelled() {
            return Err(ReaderError::Closed);
        }
        let guard = self.mmap.read().unwrap();
        let Some(mmap) = guard.as_ref() else {
            return Err(ReaderError::Closed);
        };
        if pos >= mmap.len() as u64 {
            return Ok(0);
        }
        let start = pos as usize;
        let end = (start + buf.len()).min(mmap.len());
        let count = end - start;
        buf[..count].copy_from_slice(&mmap[start..end]);
        Ok(count)
    }

    /// Annule le lecteur et libère la vue mappée. Idempotent : les appels
    /// suivants sont sans effet.
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut guard = self.mmap.write().unwrap();
        *guard = None;
        debug!("reader cancelled for {:?}", self.path);
    }

    /// Nouveau curseur de lecture positionné au début du fichier.
    pub fn cursor(self: &Arc<Self>) -> ReaderCursor {
        ReaderCursor {
            reader: Arc::clone(self),
            pos: 0,
        }
    }
}

impl Drop for CancelReader {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for CancelReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelReader")
            .field("path", &self.path)
            .field("len", &self.len)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Curseur de lecture indépendant sur un [`CancelReader`].
///
/// Chaque curseur porte sa propre position : plusieurs requêtes peuvent lire
/// la même ressource à des offsets différents sans se gêner. Implémente
/// [`Read`]/[`Seek`] pour les accès aléatoires et [`AsyncRead`] pour le
/// streaming de corps HTTP ; la lecture étant servie depuis la mémoire, le
/// poll est toujours immédiat.
pub struct ReaderCursor {
    reader: Arc<CancelReader>,
    pos: u64,
}

impl ReaderCursor {
    /// Position courante du curseur.
    pub fn position(&self) -> u64 {
        self.pos
    }
}

impl Read for ReaderCursor {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let count = self.reader.read_at(self.pos, buf).map_err(std::io::Error::from)?;
        self.pos += count as u64;
        Ok(count)
    }
}

impl Seek for ReaderCursor {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        if self.reader.is_cancelled() {
            return Err(ReaderError::Closed.into());
        }
        let (base, offset) = match pos {
            SeekFrom::Start(offset) => {
                self.pos = offset;
                return Ok(self.pos);
            }
            SeekFrom::Current(delta) => (self.pos as i64, delta),
            SeekFrom::End(delta) => (self.reader.len() as i64, delta),
        };
        let target = base.checked_add(offset).filter(|p| *p >= 0).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek before start of resource",
            )
        })?;
        self.pos = target as u64;
        Ok(self.pos)
    }
}

impl AsyncRead for ReaderCursor {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let cursor = self.get_mut();
        let dst = buf.initialize_unfilled();
        match cursor.reader.read_at(cursor.pos, dst) {
            Ok(count) => {
                cursor.pos += count as u64;
                buf.advance(count);
                Poll::Ready(Ok(()))
            }
            Err(e) => Poll::Ready(Err(e.into())),
        }
    }
}
