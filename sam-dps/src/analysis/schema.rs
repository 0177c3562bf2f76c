//! Global template sheets and their declared columns

use serde::Serialize;

/// Sheets every global workbook must carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum SheetKind {
    Servers,
    Softpartitions,
    Products,
    AcquiredRights,
}

impl SheetKind {
    pub const ALL: [SheetKind; 4] = [
        SheetKind::Servers,
        SheetKind::Softpartitions,
        SheetKind::Products,
        SheetKind::AcquiredRights,
    ];

    /// Sheet name as it appears in the workbook
    pub fn name(&self) -> &'static str {
        match self {
            SheetKind::Servers => "servers",
            SheetKind::Softpartitions => "softpartitions",
            SheetKind::Products => "products",
            SheetKind::AcquiredRights => "acquiredRights",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    /// Reason reported when the sheet cannot be read
    pub fn read_failure(&self) -> &'static str {
        match self {
            SheetKind::Servers => "failedToReadServerSheet",
            SheetKind::Softpartitions => "failedToReadSoftpartitionSheet",
            SheetKind::Products => "failedToReadProductSheet",
            SheetKind::AcquiredRights => "failedToReadAcquiredRightSheet",
        }
    }
}

/// How strongly a column is required
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Optional header, optional value
    Wished,
    /// Header required, value may be blank
    MandatoryWithBlank,
    /// Header and value required
    Mandatory,
}

impl Tier {
    pub fn requires_header(&self) -> bool {
        !matches!(self, Tier::Wished)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Int,
    Float,
    Date,
}

impl FieldType {
    /// Expected format shown in wrong type comments
    pub fn describe(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Int => "integer",
            FieldType::Float => "float",
            FieldType::Date => "DD-MM-YYYY or DD/MM/YYYY",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub tier: Tier,
    pub field_type: FieldType,
}

const fn field(tier: Tier, field_type: FieldType) -> FieldSpec {
    FieldSpec { tier, field_type }
}

use FieldType::{Date, Float, Int, String as Text};
use Tier::{Mandatory, MandatoryWithBlank, Wished};

const SERVERS: &[(&str, FieldSpec)] = &[
    ("server_name", field(MandatoryWithBlank, Text)),
    ("server_id", field(Mandatory, Text)),
    ("server_type", field(Wished, Text)),
    ("server_os", field(Wished, Text)),
    ("cpu_model", field(Mandatory, Text)),
    ("cores_per_processor", field(Mandatory, Int)),
    ("hyperthreading", field(Wished, Text)),
    ("cluster_name", field(MandatoryWithBlank, Text)),
    ("vcenter_name", field(MandatoryWithBlank, Text)),
    ("vcenter_version", field(Wished, Text)),
    ("datacenter_name", field(Wished, Text)),
    ("ibm_pvu", field(MandatoryWithBlank, Float)),
    ("sag_uvu", field(MandatoryWithBlank, Int)),
    ("cpu_manufacturer", field(MandatoryWithBlank, Text)),
    ("server_processors_numbers", field(Mandatory, Int)),
];

const SOFTPARTITIONS: &[(&str, FieldSpec)] = &[
    ("softpartition_name", field(MandatoryWithBlank, Text)),
    ("softpartition_id", field(Mandatory, Text)),
    ("server_id", field(Mandatory, Text)),
];

const PRODUCTS: &[(&str, FieldSpec)] = &[
    ("product_name", field(Mandatory, Text)),
    ("product_version", field(Mandatory, Text)),
    ("product_editor", field(Mandatory, Text)),
    ("host_id", field(Mandatory, Text)),
    ("domain", field(MandatoryWithBlank, Text)),
    ("environment", field(MandatoryWithBlank, Text)),
    ("application_name", field(MandatoryWithBlank, Text)),
    ("application_id", field(MandatoryWithBlank, Text)),
    ("application_instance_name", field(MandatoryWithBlank, Text)),
    ("number_of_access", field(MandatoryWithBlank, Int)),
];

const ACQUIRED_RIGHTS: &[(&str, FieldSpec)] = &[
    ("maintenance_provider", field(MandatoryWithBlank, Text)),
    ("last_po", field(MandatoryWithBlank, Text)),
    ("support_number", field(MandatoryWithBlank, Text)),
    ("software_provider", field(MandatoryWithBlank, Text)),
    ("ordering_date", field(MandatoryWithBlank, Date)),
    ("csc", field(MandatoryWithBlank, Text)),
    ("sku", field(Mandatory, Text)),
    ("product_name", field(Mandatory, Text)),
    ("product_version", field(Mandatory, Text)),
    ("product_editor", field(Mandatory, Text)),
    ("metric", field(Mandatory, Text)),
    ("licence_type", field(Wished, Text)),
    ("acquired_licenses", field(Mandatory, Int)),
    ("unit_price", field(Mandatory, Float)),
    ("maintenance_licences", field(MandatoryWithBlank, Int)),
    ("maintenance_unit_price", field(MandatoryWithBlank, Float)),
    ("maintenance_start", field(MandatoryWithBlank, Date)),
    ("maintenance_end", field(MandatoryWithBlank, Date)),
];

/// Declared columns of a sheet
pub fn columns(kind: SheetKind) -> &'static [(&'static str, FieldSpec)] {
    match kind {
        SheetKind::Servers => SERVERS,
        SheetKind::Softpartitions => SOFTPARTITIONS,
        SheetKind::Products => PRODUCTS,
        SheetKind::AcquiredRights => ACQUIRED_RIGHTS,
    }
}

/// Declaration for `header`; undeclared columns are optional text
pub fn field_spec(kind: SheetKind, header: &str) -> FieldSpec {
    columns(kind)
        .iter()
        .find(|(name, _)| *name == header)
        .map(|(_, spec)| *spec)
        .unwrap_or(field(Wished, Text))
}
