//! Persona registry: the fixed set of tutor profiles.
//!
//! Each persona maps a stable key to an immutable instruction template. The
//! table is built once on first access and never mutated.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::LazyLock;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Identifier of a tutor persona.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PersonaId {
    #[default]
    General,
    Scientific,
    Humanistic,
}

impl PersonaId {
    /// All personas, in display order.
    pub const ALL: [PersonaId; 3] = [Self::General, Self::Scientific, Self::Humanistic];

    /// The stable key used on the wire and in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "tutor-general",
            Self::Scientific => "tutor-scientific",
            Self::Humanistic => "tutor-humanistic",
        }
    }

    /// Resolve an optional client-supplied key, falling back to the general
    /// tutor when the key is missing or unknown.
    pub fn resolve(key: Option<&str>) -> Self {
        key.and_then(|k| k.parse().ok()).unwrap_or_default()
    }

    /// The persona definition for this id.
    pub fn persona(&self) -> &'static Persona {
        match self {
            Self::General => &PERSONAS[0],
            Self::Scientific => &PERSONAS[1],
            Self::Humanistic => &PERSONAS[2],
        }
    }

    /// Shorthand for `self.persona().instruction`.
    pub fn instruction(&self) -> &'static str {
        self.persona().instruction
    }
}

impl std::fmt::Display for PersonaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a persona key is not in the registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown persona: {0}")]
pub struct UnknownPersona(pub String);

impl FromStr for PersonaId {
    type Err = UnknownPersona;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        REGISTRY
            .get(s.trim().to_ascii_lowercase().as_str())
            .copied()
            .ok_or_else(|| UnknownPersona(s.to_string()))
    }
}

impl Serialize for PersonaId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PersonaId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let key = String::deserialize(deserializer)?;
        key.parse().map_err(serde::de::Error::custom)
    }
}

/// A named tutoring behavior profile.
#[derive(Debug)]
pub struct Persona {
    pub id: PersonaId,
    /// Human-readable name
    pub name: &'static str,
    /// Short key accepted as an alias for the stable key
    pub short_key: &'static str,
    /// Fixed instruction text placed at the top of every prompt
    pub instruction: &'static str,
}

static PERSONAS: [Persona; 3] = [
    Persona {
        id: PersonaId::General,
        name: "Tutor Generale",
        short_key: "general",
        instruction: GENERAL_INSTRUCTION,
    },
    Persona {
        id: PersonaId::Scientific,
        name: "Tutor Scientifico",
        short_key: "scientific",
        instruction: SCIENTIFIC_INSTRUCTION,
    },
    Persona {
        id: PersonaId::Humanistic,
        name: "Tutor Umanistico",
        short_key: "humanistic",
        instruction: HUMANISTIC_INSTRUCTION,
    },
];

/// Key → id lookup, covering both stable keys and short aliases.
static REGISTRY: LazyLock<HashMap<&'static str, PersonaId>> = LazyLock::new(|| {
    let mut map = HashMap::new();
    for persona in &PERSONAS {
        map.insert(persona.id.as_str(), persona.id);
        map.insert(persona.short_key, persona.id);
    }
    map
});

/// Iterate over every registered persona.
pub fn all() -> impl Iterator<Item = &'static Persona> {
    PERSONAS.iter()
}

const GENERAL_INSTRUCTION: &str = "\
Sei il Tutor Generale di NODU.ME.
IL TUO OBIETTIVO: Sei come un fratello maggiore o un coach paziente.

REGOLE FONDAMENTALI:
1. NON usare mai \"paroloni\" accademici. Parla semplice, come in una chat tra amici.
2. Se lo studente è in ansia, sdrammatizza. Usa emoji occasionalmente (ma non troppe).
3. Se ti chiedono un piano di studio, fallo SUPER concreto (es. \"Oggi fai solo pag 10 e 11, poi pausa\").
4. NON spiegare le materie qui. Se chiedono aiuto su un esercizio, dì: \"Per questo c'è il Prof di Scientifico, andiamo da lui? Clicca sulla carta blu!\".";

const SCIENTIFIC_INSTRUCTION: &str = "\
Sei il Tutor Scientifico.
IL TUO OBIETTIVO: Insegnare il ragionamento, NON dare la soluzione. Spiegare come se lo studente avesse difficoltà enormi.

REGOLE DI COMPORTAMENTO:
1. **METODO PASSO-PASSO:** Non spiegare tutto insieme. Spiega SOLO il primo passaggio. Poi chiedi: \"Fino a qui ci sei? Ti è chiaro perché abbiamo fatto questo?\".
2. **LINGUAGGIO ELEMENTARE:** Non dire \"Applichiamo la proprietà distributiva\". Dì: \"Dobbiamo moltiplicare questo numero per tutti quelli nella parentesi\".
3. **ZERO SOLUZIONI COMPLETE:** Se mandi un'immagine di un esercizio, NON risolverlo tutto. Risolvi la prima riga e chiedi allo studente di provare la seconda.
4. **MATEMATICA VISIVA:** Quando puoi, descrivi le cose in modo visivo o con esempi della vita reale (es. \"Immagina la funzione come una montagna russa...\").
5. Usa LaTeX per le formule ma spiega cosa significano i simboli a parole.";

const HUMANISTIC_INSTRUCTION: &str = "\
Sei il Tutor Umanistico.
IL TUO OBIETTIVO: Raccontare storie, non lezioni.

REGOLE DI COMPORTAMENTO:
1. **STORYTELLING:** La storia e la filosofia sono pettegolezzi di persone morte. Raccontale così. Usa metafore moderne (es. \"Napoleone era l'influencer più famoso d'Europa\").
2. **CONNESSIONI:** Se parli di un autore, collegalo a qualcosa che lo studente conosce (serie TV, sentimenti attuali, canzoni).
3. **SCHEMI:** Alla fine della spiegazione, fai SEMPRE un micro-schema riassuntivo con parole chiave in grassetto.
4. **NO MURI DI TESTO:** Dividi la risposta in paragrafi brevi.";
