use crate::error::{Error, Result};
use crate::index::IndexKind;
use crate::namespace::PoolManager;
use crate::record::Payload;
use tracing::debug;

/// Executes one whitespace-separated command line against the namespace,
/// returning a human-readable confirmation.
///
/// Structure commands: `add-pool P`, `remove-pool P`, `add-schema P S`,
/// `remove-schema P S`, `add-collection P S C TYPE`,
/// `remove-collection P S C`. Data commands address a collection by its
/// full path: `insert-data P S C KEY VALUE`, `get-data P S C KEY`,
/// `get-range P S C MIN MAX`, `update-data P S C KEY VALUE`,
/// `delete-data P S C KEY`. State commands: `save-state FILE`,
/// `load-state FILE`.
pub fn run_command(pools: &mut PoolManager, line: &str) -> Result<String> {
    let args: Vec<&str> = line.split_whitespace().collect();
    let (verb, rest) = match args.split_first() {
        Some((verb, rest)) => (*verb, rest),
        None => return Err(Error::MissingArguments(String::from("command"))),
    };
    debug!(verb, "dispatching command");

    match verb {
        "add-pool" => {
            need(rest, 1, verb)?;
            pools.add_pool(rest[0])?;
            Ok(format!("pool `{}` created", rest[0]))
        }
        "remove-pool" => {
            need(rest, 1, verb)?;
            pools.remove_pool(rest[0])?;
            Ok(format!("pool `{}` removed", rest[0]))
        }
        "add-schema" => {
            need(rest, 2, verb)?;
            pools.pool_mut(rest[0])?.add_schema(rest[1])?;
            Ok(format!("schema `{}` created in pool `{}`", rest[1], rest[0]))
        }
        "remove-schema" => {
            need(rest, 2, verb)?;
            pools.pool_mut(rest[0])?.remove_schema(rest[1])?;
            Ok(format!("schema `{}` removed from pool `{}`", rest[1], rest[0]))
        }
        "add-collection" => {
            need(rest, 4, verb)?;
            let kind = IndexKind::from_tag(rest[3]);
            pools
                .pool_mut(rest[0])?
                .schema_mut(rest[1])?
                .add_collection(rest[2], kind)?;
            Ok(format!(
                "collection `{}` ({}) created in `{}`.`{}`",
                rest[2],
                kind.tag(),
                rest[0],
                rest[1]
            ))
        }
        "remove-collection" => {
            need(rest, 3, verb)?;
            pools
                .pool_mut(rest[0])?
                .schema_mut(rest[1])?
                .remove_collection(rest[2])?;
            Ok(format!(
                "collection `{}` removed from `{}`.`{}`",
                rest[2], rest[0], rest[1]
            ))
        }
        "insert-data" => {
            need(rest, 5, verb)?;
            let collection = pools.collection_mut(rest[0], rest[1], rest[2])?;
            collection.insert(rest[3].to_string(), Payload::from(rest[4]))?;
            Ok(format!("inserted `{}`", rest[3]))
        }
        "get-data" => {
            need(rest, 4, verb)?;
            let collection = pools.collection(rest[0], rest[1], rest[2])?;
            let value = collection.get(rest[3])?;
            Ok(format!(
                "{} = {}",
                rest[3],
                String::from_utf8_lossy(value.as_ref())
            ))
        }
        "get-range" => {
            need(rest, 5, verb)?;
            let collection = pools.collection(rest[0], rest[1], rest[2])?;
            let keys = collection.get_range(rest[3], rest[4]);
            Ok(keys.join(" "))
        }
        "update-data" => {
            need(rest, 5, verb)?;
            let collection = pools.collection_mut(rest[0], rest[1], rest[2])?;
            collection.update(rest[3], Payload::from(rest[4]))?;
            Ok(format!("updated `{}`", rest[3]))
        }
        "delete-data" => {
            need(rest, 4, verb)?;
            let collection = pools.collection_mut(rest[0], rest[1], rest[2])?;
            collection.remove(rest[3])?;
            Ok(format!("deleted `{}`", rest[3]))
        }
        "save-state" => {
            need(rest, 1, verb)?;
            pools.save_to_file(rest[0])?;
            Ok(format!("state saved to `{}`", rest[0]))
        }
        "load-state" => {
            need(rest, 1, verb)?;
            *pools = PoolManager::load_from_file(rest[0])?;
            Ok(format!("state loaded from `{}`", rest[0]))
        }
        other => Err(Error::UnknownCommand(other.to_string())),
    }
}

fn need(args: &[&str], count: usize, verb: &str) -> Result<()> {
    if args.len() < count {
        return Err(Error::MissingArguments(verb.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::run_command;
    use crate::error::Error;
    use crate::namespace::PoolManager;

    fn run_all(pools: &mut PoolManager, lines: &[&str]) {
        for line in lines {
            run_command(pools, line).unwrap();
        }
    }

    #[test]
    fn structure_and_data_commands_end_to_end() {
        let mut pools = PoolManager::new();
        run_all(
            &mut pools,
            &[
                "add-pool p1",
                "add-schema p1 s1",
                "add-collection p1 s1 users avl",
                "insert-data p1 s1 users carol secret",
                "insert-data p1 s1 users alice hello",
                "insert-data p1 s1 users bob world",
            ],
        );

        let shown = run_command(&mut pools, "get-data p1 s1 users alice").unwrap();
        assert_eq!(shown, "alice = hello");
        let range = run_command(&mut pools, "get-range p1 s1 users alice carol").unwrap();
        assert_eq!(range, "alice bob carol");

        run_command(&mut pools, "update-data p1 s1 users bob there").unwrap();
        assert_eq!(
            run_command(&mut pools, "get-data p1 s1 users bob").unwrap(),
            "bob = there"
        );
        run_command(&mut pools, "delete-data p1 s1 users bob").unwrap();
        assert!(matches!(
            run_command(&mut pools, "get-data p1 s1 users bob"),
            Err(Error::NotFound)
        ));

        run_all(
            &mut pools,
            &["remove-collection p1 s1 users", "remove-schema p1 s1", "remove-pool p1"],
        );
        assert!(pools.pool_names().is_empty());
    }

    #[test]
    fn unknown_collection_type_falls_back_to_map() {
        let mut pools = PoolManager::new();
        run_all(
            &mut pools,
            &[
                "add-pool p",
                "add-schema p s",
                "add-collection p s c something-else",
            ],
        );
        let collection = pools.collection("p", "s", "c").unwrap();
        assert_eq!(collection.kind().tag(), "map");
    }

    #[test]
    fn bad_input_is_rejected() {
        let mut pools = PoolManager::new();
        assert!(matches!(
            run_command(&mut pools, ""),
            Err(Error::MissingArguments(_))
        ));
        assert!(matches!(
            run_command(&mut pools, "add-pool"),
            Err(Error::MissingArguments(_))
        ));
        assert!(matches!(
            run_command(&mut pools, "frobnicate x"),
            Err(Error::UnknownCommand(_))
        ));
        assert!(matches!(
            run_command(&mut pools, "add-schema ghost s"),
            Err(Error::NotFound)
        ));
        run_command(&mut pools, "add-pool p").unwrap();
        assert!(matches!(
            run_command(&mut pools, "add-pool p"),
            Err(Error::DuplicateKey)
        ));
    }

    #[test]
    fn state_commands_round_trip_through_a_file() {
        let mut path = std::env::temp_dir();
        path.push("_arborstor_command_state.db");
        let path_text = path.to_string_lossy().to_string();

        let mut pools = PoolManager::new();
        run_all(
            &mut pools,
            &[
                "add-pool p",
                "add-schema p s",
                "add-collection p s kv btree",
                "insert-data p s kv k1 v1",
                "insert-data p s kv k2 v2",
            ],
        );
        run_command(&mut pools, &format!("save-state {path_text}")).unwrap();

        let mut fresh = PoolManager::new();
        run_command(&mut fresh, &format!("load-state {path_text}")).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(
            run_command(&mut fresh, "get-data p s kv k2").unwrap(),
            "k2 = v2"
        );
    }
}
