//! Almacenamiento en disco de los ficheros subidos, un directorio por sesión.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::StorageError;

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn session_dir(&self, session_id: Uuid) -> PathBuf {
        self.root.join(session_id.to_string())
    }

    /// Guarda el fichero como `<root>/<sesión>/<documento>-<nombre saneado>`.
    pub async fn save(
        &self,
        session_id: Uuid,
        document_id: Uuid,
        filename: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, StorageError> {
        let dir = self.session_dir(session_id);
        tokio::fs::create_dir_all(&dir).await?;

        let target = dir.join(format!("{}-{}", document_id, sanitize_filename(filename)));
        if let Err(e) = tokio::fs::write(&target, bytes).await {
            // No dejar un fichero a medio escribir.
            if let Err(cleanup) = self.remove(&target).await {
                warn!(error = %cleanup, "No se pudo borrar el fichero incompleto {}", target.display());
            }
            return Err(e.into());
        }
        debug!("Fichero guardado en {}", target.display());
        Ok(target)
    }

    pub async fn read(&self, path: &Path) -> Result<Vec<u8>, StorageError> {
        Ok(tokio::fs::read(path).await?)
    }

    /// Borra un fichero; si ya no existe no es un error.
    pub async fn remove(&self, path: &Path) -> Result<(), StorageError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Borra el directorio completo de una sesión, si existe.
    pub async fn remove_session(&self, session_id: Uuid) -> Result<(), StorageError> {
        match tokio::fs::remove_dir_all(self.session_dir(session_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Sustituye por `_` todo carácter fuera de `[A-Za-z0-9._-]`.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_unsafe_characters() {
        assert_eq!(sanitize_filename("informe final.pdf"), "informe_final.pdf");
        assert_eq!(sanitize_filename("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize_filename("año-2024_v1.txt"), "a_o-2024_v1.txt");
    }

    #[tokio::test]
    async fn save_read_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let session = Uuid::new_v4();
        let document = Uuid::new_v4();

        let path = store
            .save(session, document, "mis notas.txt", b"contenido")
            .await
            .unwrap();
        assert!(path.starts_with(dir.path().join(session.to_string())));
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .ends_with("-mis_notas.txt"));
        assert_eq!(store.read(&path).await.unwrap(), b"contenido");

        tokio_test::assert_ok!(store.remove(&path).await);
        assert!(!path.exists());
        // Borrar otra vez no falla.
        tokio_test::assert_ok!(store.remove(&path).await);
        tokio_test::assert_ok!(store.remove_session(session).await);
        tokio_test::assert_ok!(store.remove_session(session).await);
    }

    #[tokio::test]
    async fn save_fails_when_root_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();

        let store = FileStore::new(&blocker);
        tokio_test::assert_err!(
            store
                .save(Uuid::new_v4(), Uuid::new_v4(), "a.txt", b"data")
                .await
        );
    }

    #[tokio::test]
    async fn failed_write_leaves_no_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let session = Uuid::new_v4();
        let document = Uuid::new_v4();

        // Un directorio en la ruta destino hace fallar la escritura.
        let target = dir
            .path()
            .join(session.to_string())
            .join(format!("{document}-a.txt"));
        std::fs::create_dir_all(&target).unwrap();

        tokio_test::assert_err!(store.save(session, document, "a.txt", b"data").await);
        assert!(target.is_dir());
        let leftovers = std::fs::read_dir(dir.path().join(session.to_string()))
            .unwrap()
            .filter(|entry| entry.as_ref().unwrap().path().is_file())
            .count();
        assert_eq!(leftovers, 0);
    }
}
