//! Section schema registry.
//!
//! Each section is described once, per structural version, as a static
//! [`Layout`]: which files live in its directory, which field of the section
//! value each file holds, and where one subdirectory or file per instance is
//! used. The reader and writer are generic walks over these tables, so a new
//! section or version is a table change only.

use std::fmt;

use super::version::StructuralVersion;
use crate::error::{CodecError, Result};

/// Which part of a value a layout slot holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// The value itself.
    Whole,
    /// One key of an object value.
    Key(&'static str),
    /// The object minus every key claimed by sibling slots.
    Rest,
}

impl Field {
    pub fn key(&self) -> Option<&'static str> {
        match *self {
            Field::Key(k) => Some(k),
            _ => None,
        }
    }
}

/// How an instance derives its on-disk name from its value.
///
/// Each candidate is a list of dotted key paths; the first candidate whose
/// paths all resolve to strings or numbers is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Naming {
    pub candidates: &'static [&'static [&'static str]],
}

impl Naming {
    /// Number of directory levels an instance occupies when nested.
    pub fn depth(&self) -> usize {
        self.candidates.first().map(|c| c.len()).unwrap_or(1)
    }

    /// The key paths used when filling identifying fields back in on read.
    pub fn primary(&self) -> &'static [&'static str] {
        self.candidates.first().copied().unwrap_or(&[])
    }
}

/// Shape of the collection behind an [`Entry::EntryFiles`] slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    /// An array of objects, each carrying its own name.
    Array,
    /// An object keyed by name.
    Object,
}

/// One slot of a layout.
#[derive(Debug, Clone, Copy)]
pub enum Entry {
    /// A JSON file written through the canonical serializer.
    Json {
        file: &'static str,
        field: Field,
        required: bool,
    },
    /// A text file written byte for byte.
    Verbatim {
        file: &'static str,
        field: Field,
        required: bool,
    },
    /// Every file below the directory not claimed by a sibling slot, as an
    /// object from `/`-separated relative path to text.
    VerbatimTree { field: Field },
    /// An array with one subdirectory per element.
    Instances {
        dir: &'static str,
        field: Field,
        naming: Naming,
        layout: &'static Layout,
    },
    /// A collection with one `<name>.json` file per element.
    EntryFiles {
        dir: &'static str,
        field: Field,
        naming: Naming,
        container: Container,
    },
}

impl Entry {
    pub fn field(&self) -> Field {
        match self {
            Entry::Json { field, .. }
            | Entry::Verbatim { field, .. }
            | Entry::VerbatimTree { field }
            | Entry::Instances { field, .. }
            | Entry::EntryFiles { field, .. } => *field,
        }
    }

    /// The file or directory name this slot owns directly below its base.
    pub fn own_name(&self) -> Option<&'static str> {
        match *self {
            Entry::Json { file, .. } | Entry::Verbatim { file, .. } => Some(file),
            Entry::Instances { dir, .. } | Entry::EntryFiles { dir, .. } if !dir.is_empty() => {
                Some(dir)
            }
            _ => None,
        }
    }

    /// Whether this slot reads from its base directory itself. Such a slot
    /// is never absent on read, so a value without it cannot round-trip.
    pub fn reads_base_dir(&self) -> bool {
        match *self {
            Entry::VerbatimTree { .. } => true,
            Entry::Instances { dir, .. } | Entry::EntryFiles { dir, .. } => dir.is_empty(),
            Entry::Json { .. } | Entry::Verbatim { .. } => false,
        }
    }
}

/// The files making up one directory level.
#[derive(Debug)]
pub struct Layout {
    pub entries: &'static [Entry],
}

impl Layout {
    /// Keys claimed by `Field::Key` slots.
    pub fn claimed_keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().filter_map(|e| e.field().key())
    }

    pub fn has_rest(&self) -> bool {
        self.entries.iter().any(|e| e.field() == Field::Rest)
    }

    /// The slot holding the whole value, if the layout is a single such slot.
    pub fn whole(&self) -> Option<&'static Entry> {
        match self.entries {
            [entry] if entry.field() == Field::Whole => Some(entry),
            _ => None,
        }
    }

    /// Names owned by slots of this level, e.g. `config.json` or `rules`.
    pub fn reserved_names(&self) -> Vec<&'static str> {
        self.entries.iter().filter_map(Entry::own_name).collect()
    }

    fn collect_files(&self, out: &mut Vec<&'static str>) {
        for entry in self.entries {
            match entry {
                Entry::Json { file, .. } | Entry::Verbatim { file, .. } => {
                    if !out.contains(file) {
                        out.push(*file);
                    }
                }
                Entry::Instances { layout, .. } => layout.collect_files(out),
                Entry::VerbatimTree { .. } | Entry::EntryFiles { .. } => {}
            }
        }
    }
}

/// Whether a section is one directory or one item per named instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    Single,
    Multi { naming: Naming },
}

/// Static description of one section.
#[derive(Debug)]
pub struct SectionDescriptor {
    /// Key in the application document.
    pub name: &'static str,
    /// Directory below the root; `None` for files at the root itself.
    pub dir: Option<&'static str>,
    pub layout: Layout,
}

impl SectionDescriptor {
    pub fn cardinality(&self) -> Cardinality {
        match self.layout.whole() {
            Some(Entry::Instances { naming, .. }) | Some(Entry::EntryFiles { naming, .. }) => {
                Cardinality::Multi { naming: *naming }
            }
            _ => Cardinality::Single,
        }
    }

    /// Fixed file names this section may contain, at any depth.
    pub fn file_names(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        self.layout.collect_files(&mut out);
        out
    }

    /// Key used to name each instance of a multi section.
    pub fn instance_key(&self) -> Option<&'static [&'static str]> {
        match self.cardinality() {
            Cardinality::Multi { naming } => Some(naming.primary()),
            Cardinality::Single => None,
        }
    }
}

impl fmt::Display for SectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Section names, as used in the application document.
pub const SECTION_APP: &str = "app";
pub const SECTION_AUTH: &str = "auth";
pub const SECTION_SYNC: &str = "sync";
pub const SECTION_FUNCTIONS: &str = "functions";
pub const SECTION_DATA_SOURCES: &str = "data_sources";
pub const SECTION_HTTP_ENDPOINTS: &str = "http_endpoints";
pub const SECTION_SERVICES: &str = "services";
pub const SECTION_VALUES: &str = "values";
pub const SECTION_ENVIRONMENTS: &str = "environments";
pub const SECTION_DEPENDENCIES: &str = "dependencies";

/// Fixed file names.
pub const FILE_CONFIG: &str = "config.json";
pub const FILE_RULES: &str = "rules.json";
pub const FILE_SCHEMA: &str = "schema.json";
pub const FILE_RELATIONSHIPS: &str = "relationships.json";
pub const FILE_PROVIDERS: &str = "providers.json";
pub const FILE_CUSTOM_USER_DATA: &str = "custom_user_data.json";
pub const FILE_DEFAULT_RULE: &str = "default_rule.json";
pub const FILE_SOURCE: &str = "source.js";

/// Directory names used inside instances.
pub const DIR_INCOMING_WEBHOOKS: &str = "incoming_webhooks";
pub const DIR_RULES: &str = "rules";

const BY_NAME: Naming = Naming {
    candidates: &[&["name"]],
};
const BY_CONFIG_NAME: Naming = Naming {
    candidates: &[&["config.name"]],
};
const BY_NAMESPACE: Naming = Naming {
    candidates: &[&["database", "collection"]],
};
const BY_NAMESPACE_OR_NAME: Naming = Naming {
    candidates: &[&["database", "collection"], &["name"]],
};

// Shared pieces

const WEBHOOK: Layout = Layout {
    entries: &[
        Entry::Json {
            file: FILE_CONFIG,
            field: Field::Rest,
            required: true,
        },
        Entry::Verbatim {
            file: FILE_SOURCE,
            field: Field::Key("source"),
            required: false,
        },
    ],
};

const WEBHOOKS: Entry = Entry::Instances {
    dir: DIR_INCOMING_WEBHOOKS,
    field: Field::Key("incoming_webhooks"),
    naming: BY_NAME,
    layout: &WEBHOOK,
};

const VALUES: SectionDescriptor = SectionDescriptor {
    name: SECTION_VALUES,
    dir: Some("values"),
    layout: Layout {
        entries: &[Entry::EntryFiles {
            dir: "",
            field: Field::Whole,
            naming: BY_NAME,
            container: Container::Array,
        }],
    },
};

// Version 2

const V2_COLLECTION_RULE: Layout = Layout {
    entries: &[
        Entry::Json {
            file: FILE_RULES,
            field: Field::Rest,
            required: true,
        },
        Entry::Json {
            file: FILE_SCHEMA,
            field: Field::Key("schema"),
            required: false,
        },
        Entry::Json {
            file: FILE_RELATIONSHIPS,
            field: Field::Key("relationships"),
            required: false,
        },
    ],
};

const V2_DATA_SOURCE: Layout = Layout {
    entries: &[
        Entry::Json {
            file: FILE_CONFIG,
            field: Field::Key("config"),
            required: true,
        },
        Entry::Json {
            file: FILE_DEFAULT_RULE,
            field: Field::Key("default_rule"),
            required: false,
        },
        Entry::Instances {
            dir: "",
            field: Field::Key("rules"),
            naming: BY_NAMESPACE,
            layout: &V2_COLLECTION_RULE,
        },
    ],
};

const V2_HTTP_ENDPOINT: Layout = Layout {
    entries: &[
        Entry::Json {
            file: FILE_CONFIG,
            field: Field::Key("config"),
            required: true,
        },
        WEBHOOKS,
        Entry::EntryFiles {
            dir: DIR_RULES,
            field: Field::Key("rules"),
            naming: BY_NAME,
            container: Container::Array,
        },
    ],
};

static V2_SECTIONS: [SectionDescriptor; 9] = [
    SectionDescriptor {
        name: SECTION_APP,
        dir: None,
        layout: Layout {
            entries: &[Entry::Json {
                file: "realm_config.json",
                field: Field::Rest,
                required: true,
            }],
        },
    },
    SectionDescriptor {
        name: SECTION_AUTH,
        dir: Some("auth"),
        layout: Layout {
            entries: &[
                Entry::Json {
                    file: FILE_CUSTOM_USER_DATA,
                    field: Field::Key("custom_user_data"),
                    required: false,
                },
                Entry::Json {
                    file: FILE_PROVIDERS,
                    field: Field::Key("providers"),
                    required: true,
                },
            ],
        },
    },
    SectionDescriptor {
        name: SECTION_SYNC,
        dir: Some("sync"),
        layout: Layout {
            entries: &[Entry::Json {
                file: FILE_CONFIG,
                field: Field::Key("config"),
                required: true,
            }],
        },
    },
    SectionDescriptor {
        name: SECTION_FUNCTIONS,
        dir: Some("functions"),
        layout: Layout {
            entries: &[
                Entry::Json {
                    file: FILE_CONFIG,
                    field: Field::Key("configs"),
                    required: true,
                },
                Entry::VerbatimTree {
                    field: Field::Key("sources"),
                },
            ],
        },
    },
    SectionDescriptor {
        name: SECTION_DATA_SOURCES,
        dir: Some("data_sources"),
        layout: Layout {
            entries: &[Entry::Instances {
                dir: "",
                field: Field::Whole,
                naming: BY_CONFIG_NAME,
                layout: &V2_DATA_SOURCE,
            }],
        },
    },
    SectionDescriptor {
        name: SECTION_HTTP_ENDPOINTS,
        dir: Some("http_endpoints"),
        layout: Layout {
            entries: &[Entry::Instances {
                dir: "",
                field: Field::Whole,
                naming: BY_CONFIG_NAME,
                layout: &V2_HTTP_ENDPOINT,
            }],
        },
    },
    VALUES,
    SectionDescriptor {
        name: SECTION_ENVIRONMENTS,
        dir: Some("environments"),
        layout: Layout {
            entries: &[Entry::EntryFiles {
                dir: "",
                field: Field::Whole,
                naming: BY_NAME,
                container: Container::Object,
            }],
        },
    },
    SectionDescriptor {
        name: SECTION_DEPENDENCIES,
        dir: Some("dependencies"),
        layout: Layout {
            entries: &[Entry::VerbatimTree {
                field: Field::Whole,
            }],
        },
    },
];

// Version 1

const V1_FUNCTION: Layout = Layout {
    entries: &[
        Entry::Json {
            file: FILE_CONFIG,
            field: Field::Rest,
            required: true,
        },
        Entry::Verbatim {
            file: FILE_SOURCE,
            field: Field::Key("source"),
            required: true,
        },
    ],
};

const V1_SERVICE: Layout = Layout {
    entries: &[
        Entry::Json {
            file: FILE_CONFIG,
            field: Field::Key("config"),
            required: true,
        },
        WEBHOOKS,
        Entry::EntryFiles {
            dir: DIR_RULES,
            field: Field::Key("rules"),
            naming: BY_NAMESPACE_OR_NAME,
            container: Container::Array,
        },
    ],
};

static V1_SECTIONS: [SectionDescriptor; 5] = [
    SectionDescriptor {
        name: SECTION_APP,
        dir: None,
        layout: Layout {
            entries: &[Entry::Json {
                file: "config.json",
                field: Field::Rest,
                required: true,
            }],
        },
    },
    SectionDescriptor {
        name: SECTION_AUTH,
        dir: Some("auth_providers"),
        layout: Layout {
            entries: &[Entry::EntryFiles {
                dir: "",
                field: Field::Key("providers"),
                naming: BY_NAME,
                container: Container::Object,
            }],
        },
    },
    SectionDescriptor {
        name: SECTION_FUNCTIONS,
        dir: Some("functions"),
        layout: Layout {
            entries: &[Entry::Instances {
                dir: "",
                field: Field::Whole,
                naming: BY_NAME,
                layout: &V1_FUNCTION,
            }],
        },
    },
    SectionDescriptor {
        name: SECTION_SERVICES,
        dir: Some("services"),
        layout: Layout {
            entries: &[Entry::Instances {
                dir: "",
                field: Field::Whole,
                naming: BY_CONFIG_NAME,
                layout: &V1_SERVICE,
            }],
        },
    },
    VALUES,
];

/// Returns every section known for a version, in document order.
pub fn sections(version: StructuralVersion) -> &'static [SectionDescriptor] {
    match version {
        StructuralVersion::V1 => &V1_SECTIONS,
        StructuralVersion::V2 => &V2_SECTIONS,
    }
}

/// Looks up a section by name.
pub fn describe(name: &str, version: StructuralVersion) -> Result<&'static SectionDescriptor> {
    sections(version)
        .iter()
        .find(|s| s.name == name)
        .ok_or_else(|| CodecError::UnknownSection {
            name: name.to_string(),
            version: version.to_string(),
        })
}
