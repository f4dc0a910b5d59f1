//! Status helper enums mapping to SMALLSERIAL/SMALLINT lookup tables.
//!
//! Each enum variant's discriminant matches the seed data order (1-based)
//! in the corresponding `*_statuses` database table.

/// Status ID type matching SMALLINT/SMALLSERIAL in the database.
pub type StatusId = i16;

macro_rules! define_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:literal => $label:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $val ),+
        }

        impl $name {
            /// Return the database status ID.
            pub fn id(self) -> StatusId {
                self as StatusId
            }

            /// Look up the variant for a database status ID.
            pub fn from_id(id: StatusId) -> Option<Self> {
                match id {
                    $( $val => Some(Self::$variant), )+
                    _ => None,
                }
            }

            /// The lookup table's `name` for this status.
            pub fn name(self) -> &'static str {
                match self {
                    $( Self::$variant => $label, )+
                }
            }
        }

        impl From<$name> for StatusId {
            fn from(value: $name) -> Self {
                value as StatusId
            }
        }
    };
}

define_status_enum! {
    /// Job lifecycle status.
    ///
    /// `Pending -> Running -> {Finished, Cancelled, Failed}` and
    /// `Pending -> Cancelled`. Terminal statuses only leave via a restart
    /// re-arm.
    JobStatus {
        Pending = 1 => "pending",
        Running = 2 => "running",
        Finished = 3 => "finished",
        Cancelled = 4 => "cancelled",
        Failed = 5 => "failed",
    }
}

define_status_enum! {
    /// Queue row status.
    CommandStatus {
        Pending = 1 => "pending",
        Running = 2 => "running",
    }
}

impl JobStatus {
    /// Statuses a job may still leave through normal progress.
    pub const ACTIVE: [JobStatus; 2] = [JobStatus::Pending, JobStatus::Running];

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Finished | JobStatus::Cancelled | JobStatus::Failed
        )
    }
}
