//! Error-message localization at the transport edge.
//!
//! Error kinds stay typed end to end; only here are they turned into text,
//! honoring the `locale` policy from config. The built-in catalogs cover
//! the supported languages; fuller translation catalogs are external
//! collaborators.

use std::sync::OnceLock;

use arx_types::ErrorKind;

struct Catalog {
    language: &'static str,
    entries: &'static [(ErrorKind, &'static str)],
}

const EN: Catalog = Catalog {
    language: "en",
    entries: &[
        (ErrorKind::InvalidArgument, "The request failed validation"),
        (ErrorKind::Unauthenticated, "Authentication required"),
        (ErrorKind::PermissionDenied, "You do not have permission to perform this action"),
        (ErrorKind::NotFound, "The requested resource was not found"),
        (ErrorKind::AlreadyExists, "The resource already exists"),
        (ErrorKind::Expired, "The secret has expired or its read limit is spent"),
        (ErrorKind::ResourceExhausted, "Request limit exceeded"),
        (ErrorKind::CryptoUnavailable, "Encryption is not available"),
        (ErrorKind::CryptoKeyMissing, "Encryption is not available"),
        (ErrorKind::CryptoIntegrity, "Stored data failed its integrity check"),
        (ErrorKind::Conflict, "The operation conflicted with a concurrent change, retry"),
        (ErrorKind::Cancelled, "The operation was cancelled"),
        (ErrorKind::Internal, "An internal error occurred"),
    ],
};

const DE: Catalog = Catalog {
    language: "de",
    entries: &[
        (ErrorKind::InvalidArgument, "Die Anfrage ist ungültig"),
        (ErrorKind::Unauthenticated, "Anmeldung erforderlich"),
        (ErrorKind::PermissionDenied, "Keine Berechtigung für diese Aktion"),
        (ErrorKind::NotFound, "Die angeforderte Ressource wurde nicht gefunden"),
        (ErrorKind::AlreadyExists, "Die Ressource existiert bereits"),
        (ErrorKind::Expired, "Das Geheimnis ist abgelaufen oder das Leselimit erschöpft"),
        (ErrorKind::ResourceExhausted, "Anfragelimit überschritten"),
        (ErrorKind::Internal, "Ein interner Fehler ist aufgetreten"),
    ],
};

const FR: Catalog = Catalog {
    language: "fr",
    entries: &[
        (ErrorKind::InvalidArgument, "La requête est invalide"),
        (ErrorKind::Unauthenticated, "Authentification requise"),
        (ErrorKind::PermissionDenied, "Vous n'avez pas la permission d'effectuer cette action"),
        (ErrorKind::NotFound, "La ressource demandée est introuvable"),
        (ErrorKind::AlreadyExists, "La ressource existe déjà"),
        (ErrorKind::Expired, "Le secret a expiré ou sa limite de lecture est atteinte"),
        (ErrorKind::ResourceExhausted, "Limite de requêtes dépassée"),
        (ErrorKind::Internal, "Une erreur interne s'est produite"),
    ],
};

const ES: Catalog = Catalog {
    language: "es",
    entries: &[
        (ErrorKind::InvalidArgument, "La solicitud no es válida"),
        (ErrorKind::Unauthenticated, "Se requiere autenticación"),
        (ErrorKind::PermissionDenied, "No tiene permiso para realizar esta acción"),
        (ErrorKind::NotFound, "No se encontró el recurso solicitado"),
        (ErrorKind::AlreadyExists, "El recurso ya existe"),
        (ErrorKind::Expired, "El secreto ha expirado o se agotó su límite de lecturas"),
        (ErrorKind::ResourceExhausted, "Límite de solicitudes superado"),
        (ErrorKind::Internal, "Se produjo un error interno"),
    ],
};

const CATALOGS: &[Catalog] = &[EN, DE, FR, ES];

#[derive(Debug, Clone)]
struct Policy {
    language: String,
    fallback: String,
}

static POLICY: OnceLock<Policy> = OnceLock::new();

/// Install the locale policy once at startup. Later calls are ignored,
/// which keeps tests that build several routers harmless.
pub fn install(language: &str, fallback: &str) {
    let _ = POLICY.set(Policy {
        language: language.to_string(),
        fallback: fallback.to_string(),
    });
}

fn lookup(language: &str, kind: ErrorKind) -> Option<&'static str> {
    CATALOGS
        .iter()
        .find(|c| c.language == language)?
        .entries
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, text)| *text)
}

/// Human-readable message for an error kind under the installed policy:
/// configured language, then fallback language, then English.
pub fn resolve(kind: ErrorKind) -> &'static str {
    let policy = POLICY.get();
    let (language, fallback) = match policy {
        Some(p) => (p.language.as_str(), p.fallback.as_str()),
        None => ("en", "en"),
    };
    lookup(language, kind)
        .or_else(|| lookup(fallback, kind))
        .or_else(|| lookup("en", kind))
        .unwrap_or("An error occurred")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn english_covers_every_kind() {
        for kind in [
            ErrorKind::InvalidArgument,
            ErrorKind::Unauthenticated,
            ErrorKind::PermissionDenied,
            ErrorKind::NotFound,
            ErrorKind::AlreadyExists,
            ErrorKind::Expired,
            ErrorKind::ResourceExhausted,
            ErrorKind::CryptoUnavailable,
            ErrorKind::CryptoKeyMissing,
            ErrorKind::CryptoIntegrity,
            ErrorKind::Conflict,
            ErrorKind::Cancelled,
            ErrorKind::Internal,
        ] {
            assert!(lookup("en", kind).is_some(), "missing en message for {kind:?}");
        }
    }

    #[test]
    fn partial_catalogs_fall_back_to_english() {
        // German has no Conflict entry; the resolver must not panic.
        assert!(lookup("de", ErrorKind::Conflict).is_none());
        assert_eq!(
            lookup("en", ErrorKind::Conflict).unwrap(),
            "The operation conflicted with a concurrent change, retry"
        );
    }

    #[test]
    fn crypto_messages_do_not_distinguish_key_faults() {
        // Which key version is missing must not be inferable from the text.
        assert_eq!(
            lookup("en", ErrorKind::CryptoUnavailable),
            lookup("en", ErrorKind::CryptoKeyMissing),
        );
    }
}
