//! redb table definitions. Keys are profile names, values JSON.

use redb::TableDefinition;

use edge_core::ProfileKind;

pub const SERVER_PROFILES: TableDefinition<&str, &[u8]> = TableDefinition::new("server_profiles");

pub const CLIENT_PROFILES: TableDefinition<&str, &[u8]> = TableDefinition::new("client_profiles");

pub fn for_kind(kind: ProfileKind) -> TableDefinition<'static, &'static str, &'static [u8]> {
    match kind {
        ProfileKind::Server => SERVER_PROFILES,
        ProfileKind::Client => CLIENT_PROFILES,
    }
}
