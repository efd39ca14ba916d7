//! Repository Behavior Tests
//!
//! Aggregate persistence properties verified against both store engines:
//! idempotent re-upsert, cascading child removal, child addition,
//! identity-preserving updates, optimistic concurrency, unique keys,
//! validation and deletion.

mod common;

#[cfg(test)]
mod repository_tests {
    use crate::common::{
        address, create_sql_store, create_test_store, line, order, sql_row_count, Customer,
        Engine, Manager,
    };
    use anyhow::Result;
    use docstore_core::db::{RecordStore, StoreError};
    use docstore_core::models::{Document, Expr, RecordType, MODIFIED_AT_FIELD};
    use docstore_core::services::{Repository, RepositoryError};
    use std::sync::Arc;

    async fn customer_repo(store: Arc<dyn RecordStore>) -> Result<Repository<Customer>> {
        let repo = Repository::<Customer>::new(store);
        repo.initialize().await?;
        Ok(repo)
    }

    async fn stored_graph(store: &Arc<dyn RecordStore>, customer: &Customer) -> Result<Document> {
        store
            .load_graph(&RecordType::of::<Customer>(), customer.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("customer {} not stored", customer.id))
    }

    #[tokio::test]
    async fn test_upsert_then_get_round_trips_graph() -> Result<()> {
        for engine in Engine::ALL {
            let (store, _temp_dir) = create_test_store(engine).await?;
            let repo = customer_repo(store).await?;

            let mut customer = Customer::new("Ada", "ada@example.com")
                .with_order("A-1", &["bolt", "nut"])
                .with_order("A-2", &["gear"]);
            customer.address = Some(address("1 Loop Rd", "Oslo"));

            let saved = repo.upsert(customer.clone()).await?;
            assert!(saved.audit.created_at.is_some(), "{engine}");
            assert!(saved.audit.modified_at.is_some(), "{engine}");

            let loaded = repo.get(customer.id).await?.expect("customer should exist");
            assert_eq!(loaded.name, "Ada", "{engine}");
            assert_eq!(loaded.address, customer.address, "{engine}");
            assert_eq!(loaded.orders, customer.orders, "{engine}: child order preserved");
            assert_eq!(loaded.audit.modified_at, saved.audit.modified_at, "{engine}");
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_reupsert_of_unchanged_graph_only_advances_modified() -> Result<()> {
        for engine in Engine::ALL {
            let (store, _temp_dir) = create_test_store(engine).await?;
            let repo = customer_repo(store.clone()).await?;

            let customer = Customer::new("Grace", "grace@example.com").with_order("G-1", &["a", "b"]);
            let first = repo.upsert(customer).await?;
            let mut after_first = stored_graph(&store, &first).await?;

            let second = repo.upsert(first.clone()).await?;
            let mut after_second = stored_graph(&store, &second).await?;

            assert!(
                second.audit.modified_at > first.audit.modified_at,
                "{engine}: modified_at must strictly advance"
            );
            assert_eq!(second.audit.created_at, first.audit.created_at, "{engine}");

            after_first.remove(MODIFIED_AT_FIELD);
            after_second.remove(MODIFIED_AT_FIELD);
            assert_eq!(after_first, after_second, "{engine}: stored graph unchanged");
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_removed_child_cascades_to_descendants() -> Result<()> {
        for engine in Engine::ALL {
            let (store, _temp_dir) = create_test_store(engine).await?;
            let repo = customer_repo(store.clone()).await?;

            let customer = Customer::new("Linus", "linus@example.com")
                .with_order("A", &["a1"])
                .with_order("B", &["b1", "b2"])
                .with_order("C", &["c1"]);
            let removed = customer.orders[1].clone();
            let mut saved = repo.upsert(customer).await?;

            saved.orders.remove(1);
            repo.upsert(saved.clone()).await?;

            let loaded = repo.get(saved.id).await?.expect("customer should exist");
            let numbers: Vec<_> = loaded.orders.iter().map(|o| o.number.as_str()).collect();
            assert_eq!(numbers, vec!["A", "C"], "{engine}");

            let raw = serde_json::to_string(&stored_graph(&store, &saved).await?)?;
            assert!(!raw.contains(&removed.id.to_string()), "{engine}: order B gone");
            for line in &removed.lines {
                assert!(!raw.contains(&line.id.to_string()), "{engine}: B's lines gone");
            }
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_removed_child_rows_are_deleted_from_relational_tables() -> Result<()> {
        let (store, _temp_dir) = create_sql_store().await?;
        let repo = customer_repo(store.clone()).await?;

        let customer = Customer::new("Edsger", "edsger@example.com")
            .with_order("keep", &["k1"])
            .with_order("drop", &["d1", "d2"]);
        let dropped = customer.orders[1].clone();
        let mut saved = repo.upsert(customer).await?;
        assert_eq!(sql_row_count(&store, "orders", dropped.id).await?, 1);

        saved.orders.retain(|o| o.id != dropped.id);
        repo.upsert(saved).await?;

        assert_eq!(sql_row_count(&store, "orders", dropped.id).await?, 0);
        for line in &dropped.lines {
            assert_eq!(sql_row_count(&store, "order_lines", line.id).await?, 0);
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_child_of_another_root_cannot_be_claimed() -> Result<()> {
        for engine in Engine::ALL {
            let (store, _temp_dir) = create_test_store(engine).await?;
            let repo = customer_repo(store.clone()).await?;

            let owner = repo
                .upsert(Customer::new("Ada", "ada@example.com").with_order("A-1", &["x", "y"]))
                .await?;
            let shared = owner.orders[0].clone();

            let mut claimant = Customer::new("Alan", "alan@example.com");
            claimant.orders.push(shared.clone());
            let err = repo.upsert(claimant.clone()).await.unwrap_err();
            assert!(
                matches!(
                    err,
                    RepositoryError::Store {
                        source: StoreError::OwnershipConflict { .. },
                        ..
                    }
                ),
                "{engine}: got {err:?}"
            );
            assert!(repo.get(claimant.id).await?.is_none(), "{engine}");

            let reloaded = repo.get(owner.id).await?.expect("owner should exist");
            assert_eq!(reloaded.orders.len(), 1, "{engine}");
            assert_eq!(reloaded.orders[0].id, shared.id, "{engine}");
            assert_eq!(reloaded.orders[0].lines.len(), 2, "{engine}");
            assert_eq!(reloaded.audit.modified_at, owner.audit.modified_at, "{engine}");
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_child_released_in_the_same_transaction_can_be_claimed() -> Result<()> {
        for engine in Engine::ALL {
            let (store, _temp_dir) = create_test_store(engine).await?;
            let repo = customer_repo(store.clone()).await?;

            let mut owner = repo
                .upsert(Customer::new("Ada", "ada@example.com").with_order("A-1", &["x"]))
                .await?;
            let moved = owner.orders.remove(0);

            let tx = repo.begin_transaction()?;
            repo.upsert(owner.clone()).await?;
            let mut heir = Customer::new("Alan", "alan@example.com");
            heir.orders.push(moved.clone());
            repo.upsert(heir.clone()).await?;
            repo.commit_transaction(tx).await?;

            let owner = repo.get(owner.id).await?.expect("owner should exist");
            let heir = repo.get(heir.id).await?.expect("heir should exist");
            assert!(owner.orders.is_empty(), "{engine}");
            assert_eq!(heir.orders, vec![moved.clone()], "{engine}");
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_child_can_move_between_parents_of_one_aggregate() -> Result<()> {
        for engine in Engine::ALL {
            let (store, _temp_dir) = create_test_store(engine).await?;
            let repo = customer_repo(store.clone()).await?;

            let mut saved = repo
                .upsert(
                    Customer::new("Barbara", "barbara@example.com")
                        .with_order("B-1", &["moving", "staying"])
                        .with_order("B-2", &[]),
                )
                .await?;
            let moving = saved.orders[0].lines.remove(0);
            saved.orders[1].lines.push(moving.clone());
            repo.upsert(saved.clone()).await?;

            let loaded = repo.get(saved.id).await?.expect("customer should exist");
            assert_eq!(loaded.orders[0].lines.len(), 1, "{engine}");
            assert_eq!(loaded.orders[1].lines, vec![moving.clone()], "{engine}");
            if engine == Engine::Sql {
                assert_eq!(sql_row_count(&store, "order_lines", moving.id).await?, 1);
            }
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_added_child_is_appended_without_touching_existing() -> Result<()> {
        for engine in Engine::ALL {
            let (store, _temp_dir) = create_test_store(engine).await?;
            let repo = customer_repo(store).await?;

            let mut saved = repo
                .upsert(Customer::new("Barbara", "barbara@example.com").with_order("A", &["x", "y"]))
                .await?;
            let original = saved.orders[0].clone();

            saved.orders.push(order("D", &["z"]));
            repo.upsert(saved.clone()).await?;

            let loaded = repo.get(saved.id).await?.expect("customer should exist");
            assert_eq!(loaded.orders.len(), 2, "{engine}");
            assert_eq!(loaded.orders[0], original, "{engine}: A untouched");
            assert_eq!(loaded.orders[1].number, "D", "{engine}");
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_child_update_preserves_identity() -> Result<()> {
        for engine in Engine::ALL {
            let (store, _temp_dir) = create_test_store(engine).await?;
            let repo = customer_repo(store).await?;

            let mut saved = repo
                .upsert(Customer::new("Ken", "ken@example.com").with_order("old-number", &["x"]))
                .await?;
            let order_id = saved.orders[0].id;
            let line_id = saved.orders[0].lines[0].id;

            saved.orders[0].number = "new-number".to_string();
            saved.orders[0].lines[0].quantity = 7;
            saved.orders[0].lines.push(line("w", 2));
            repo.upsert(saved.clone()).await?;

            let loaded = repo.get(saved.id).await?.expect("customer should exist");
            assert_eq!(loaded.orders.len(), 1, "{engine}");
            assert_eq!(loaded.orders[0].id, order_id, "{engine}");
            assert_eq!(loaded.orders[0].number, "new-number", "{engine}");
            assert_eq!(loaded.orders[0].lines[0].id, line_id, "{engine}");
            assert_eq!(loaded.orders[0].lines[0].quantity, 7, "{engine}");
            assert_eq!(loaded.orders[0].lines[1].sku, "w", "{engine}");
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_replaced_single_child_removes_previous() -> Result<()> {
        let (store, _temp_dir) = create_sql_store().await?;
        let repo = customer_repo(store.clone()).await?;

        let mut customer = Customer::new("Niklaus", "niklaus@example.com");
        let first = address("Old St 1", "Zurich");
        customer.address = Some(first.clone());
        let mut saved = repo.upsert(customer).await?;

        let second = address("New St 2", "Bern");
        saved.address = Some(second.clone());
        repo.upsert(saved.clone()).await?;

        assert_eq!(sql_row_count(&store, "addresses", first.id).await?, 0);
        assert_eq!(sql_row_count(&store, "addresses", second.id).await?, 1);

        let mut loaded = repo.get(saved.id).await?.expect("customer should exist");
        assert_eq!(loaded.address, Some(second.clone()));

        loaded.address = None;
        repo.upsert(loaded).await?;
        assert_eq!(sql_row_count(&store, "addresses", second.id).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_stale_upsert_fails_with_concurrency_conflict() -> Result<()> {
        for engine in Engine::ALL {
            let (store, _temp_dir) = create_test_store(engine).await?;
            let repo = customer_repo(store).await?;

            let saved = repo.upsert(Customer::new("Tony", "tony@example.com")).await?;
            let mut first_reader = repo.get(saved.id).await?.expect("customer should exist");
            let mut second_reader = repo.get(saved.id).await?.expect("customer should exist");

            first_reader.name = "Tony H".to_string();
            repo.upsert(first_reader).await?;

            second_reader.name = "C.A.R. Hoare".to_string();
            let err = repo.upsert(second_reader).await.unwrap_err();
            assert!(
                matches!(err, RepositoryError::ConcurrencyConflict { .. }),
                "{engine}: expected conflict, got {err:?}"
            );
            assert!(err.is_retryable(), "{engine}");

            let current = repo.get(saved.id).await?.expect("customer should exist");
            assert_eq!(current.name, "Tony H", "{engine}: first writer wins");
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_duplicate_unique_key_is_rejected_before_write() -> Result<()> {
        for engine in Engine::ALL {
            let (store, _temp_dir) = create_test_store(engine).await?;
            let repo = customer_repo(store).await?;

            let existing = repo.upsert(Customer::new("Ann", "ann@example.com")).await?;
            let intruder = Customer::new("Other Ann", "ANN@Example.com");

            assert!(repo.is_duplicate(&intruder).await?, "{engine}");
            assert!(!repo.is_duplicate(&existing).await?, "{engine}: own key is fine");

            let err = repo.upsert(intruder.clone()).await.unwrap_err();
            assert!(
                matches!(err, RepositoryError::DuplicateUniqueKey { .. }),
                "{engine}: got {err:?}"
            );
            assert!(!err.is_retryable(), "{engine}");
            assert!(repo.get(intruder.id).await?.is_none(), "{engine}: nothing written");

            // Re-saving the holder of the key with different casing is allowed
            let mut renamed = existing.clone();
            renamed.email = "Ann@Example.com".to_string();
            repo.upsert(renamed).await?;
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_validation_failure_leaves_store_unchanged() -> Result<()> {
        for engine in Engine::ALL {
            let (store, _temp_dir) = create_test_store(engine).await?;
            let repo = customer_repo(store).await?;

            let too_long = "x".repeat(41);
            let err = repo
                .upsert(Customer::new(&too_long, "new@example.com"))
                .await
                .unwrap_err();
            assert!(
                matches!(err, RepositoryError::Validation { .. }),
                "{engine}: got {err:?}"
            );

            let saved = repo.upsert(Customer::new("Valid", "valid@example.com")).await?;
            let mut edited = saved.clone();
            edited.name = too_long.clone();
            edited.orders.push(order("", &["sku"]));
            let err = repo.upsert(edited).await.unwrap_err();

            let messages: Vec<String> = err.violations().iter().map(ToString::to_string).collect();
            assert!(
                messages.iter().any(|m| m.starts_with("Customer.name")),
                "{engine}: {messages:?}"
            );
            assert!(
                messages.iter().any(|m| m.starts_with("Order.number")),
                "{engine}: {messages:?}"
            );

            let current = repo.get(saved.id).await?.expect("customer should exist");
            assert_eq!(current.name, "Valid", "{engine}");
            assert!(current.orders.is_empty(), "{engine}");
            assert_eq!(current.audit.modified_at, saved.audit.modified_at, "{engine}");
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_cascades_and_reports_whether_anything_was_deleted() -> Result<()> {
        for engine in Engine::ALL {
            let (store, _temp_dir) = create_test_store(engine).await?;
            let repo = customer_repo(store.clone()).await?;

            let mut customer = Customer::new("Margaret", "margaret@example.com")
                .with_order("M-1", &["apollo"]);
            customer.address = Some(address("1 Lunar Way", "Houston"));
            let saved = repo.upsert(customer).await?;

            assert!(repo.delete(saved.id).await?, "{engine}");
            assert!(repo.get(saved.id).await?.is_none(), "{engine}");
            assert!(
                store
                    .load_graph(&RecordType::of::<Customer>(), saved.id)
                    .await?
                    .is_none(),
                "{engine}"
            );
            assert!(!repo.delete(saved.id).await?, "{engine}: second delete is a no-op");

            // The key is free again
            repo.upsert(Customer::new("Margaret H", "margaret@example.com")).await?;
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_removes_every_relational_row() -> Result<()> {
        let (store, _temp_dir) = create_sql_store().await?;
        let repo = customer_repo(store.clone()).await?;

        let mut customer = Customer::new("Frances", "frances@example.com")
            .with_order("F-1", &["ptran", "fortran"]);
        let home = address("2 Compiler Ct", "Armonk");
        customer.address = Some(home.clone());
        let saved = repo.upsert(customer).await?;

        repo.delete(saved.id).await?;

        assert_eq!(sql_row_count(&store, "customers", saved.id).await?, 0);
        assert_eq!(sql_row_count(&store, "addresses", home.id).await?, 0);
        assert_eq!(sql_row_count(&store, "orders", saved.orders[0].id).await?, 0);
        for line in &saved.orders[0].lines {
            assert_eq!(sql_row_count(&store, "order_lines", line.id).await?, 0);
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_reference_is_resolved_on_read() -> Result<()> {
        for engine in Engine::ALL {
            let (store, _temp_dir) = create_test_store(engine).await?;
            let customers = customer_repo(store.clone()).await?;
            let managers = Repository::<Manager>::new(store);

            let manager = managers.upsert(Manager::new("Jean")).await?;
            let mut customer = Customer::new("Alan", "alan@example.com");
            customer.manager_id = Some(manager.id);
            let saved = customers.upsert(customer).await?;
            assert!(saved.manager.is_none(), "{engine}: references are read-only");

            let loaded = customers.get(saved.id).await?.expect("customer should exist");
            let resolved = loaded.manager.expect("manager should be resolved");
            assert_eq!(resolved.id, manager.id, "{engine}");
            assert_eq!(resolved.name, "Jean", "{engine}");

            let found = customers.find(Expr::eq("name", "Alan")).await?;
            assert_eq!(
                found[0].manager.as_ref().map(|m| m.name.as_str()),
                Some("Jean"),
                "{engine}: find resolves references too"
            );

            // A dangling key resolves to nothing
            let mut orphan = Customer::new("Orphan", "orphan@example.com");
            orphan.manager_id = Some(uuid::Uuid::new_v4());
            let orphan = customers.upsert(orphan).await?;
            let orphan = customers.get(orphan.id).await?.expect("customer should exist");
            assert!(orphan.manager.is_none(), "{engine}");
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_find_filters_on_root_fields() -> Result<()> {
        for engine in Engine::ALL {
            let (store, _temp_dir) = create_test_store(engine).await?;
            let repo = customer_repo(store).await?;

            for (name, tier) in [("Ada", 1), ("Alan", 2), ("Barbara", 3), ("Dennis", 2)] {
                let mut customer = Customer::new(name, &format!("{}@example.com", name));
                customer.tier = tier;
                repo.upsert(customer).await?;
            }

            let mut tier_two: Vec<_> = repo
                .find(Expr::eq("tier", 2))
                .await?
                .into_iter()
                .map(|c| c.name)
                .collect();
            tier_two.sort();
            assert_eq!(tier_two, vec!["Alan", "Dennis"], "{engine}");

            let found = repo
                .find(Expr::and(vec![
                    Expr::ge("tier", 2),
                    Expr::not(Expr::equals_ignore_case("name", "BARBARA")),
                ]))
                .await?;
            assert_eq!(found.len(), 2, "{engine}");

            let everyone = repo.find(Expr::True).await?;
            assert_eq!(everyone.len(), 4, "{engine}");
        }
        Ok(())
    }
}
