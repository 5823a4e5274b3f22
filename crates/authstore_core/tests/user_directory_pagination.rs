use authstore_core::repo::registry_repo::{RegistryRepository, SqliteRegistryRepository};
use authstore_core::{
    AuthRecipeUser, EmailPasswordUser, PaginationCursor, PasswordlessUser, RecipeId, SortOrder,
    StorageConfig, StorageError, ThirdPartyUser, TransactionCoordinator, UserDirectory,
    UserListQuery,
};

/// A(100, "a") email-password, B(100, "b") third-party, C(200, "c") passwordless.
fn seeded_directory(dir: &tempfile::TempDir) -> UserDirectory {
    let coordinator =
        TransactionCoordinator::open(dir.path().join("directory.db"), &StorageConfig::default())
            .unwrap();
    let directory = UserDirectory::new(coordinator);

    let mut a = EmailPasswordUser::new("a@example.com", "hash", 100);
    a.id = "a".to_string();
    let mut b = ThirdPartyUser::new("b@example.com", "google", "g-b", 100);
    b.id = "b".to_string();
    let mut c = PasswordlessUser::with_email("c@example.com", 200);
    c.id = "c".to_string();

    for user in [AuthRecipeUser::from(a), b.into(), c.into()] {
        directory.create_user(&user).unwrap();
    }
    directory
}

fn ids(users: &[AuthRecipeUser]) -> Vec<&str> {
    users.iter().map(AuthRecipeUser::id).collect()
}

#[test]
fn descending_listing_orders_by_time_then_user_id() {
    let dir = tempfile::tempdir().unwrap();
    let directory = seeded_directory(&dir);

    let users = directory
        .list_users(&UserListQuery::new(2, SortOrder::Descending))
        .unwrap();
    assert_eq!(ids(&users), vec!["c", "b"]);

    // Recipes are fully populated, not just ids.
    match &users[1] {
        AuthRecipeUser::ThirdParty(user) => assert_eq!(user.third_party.id, "google"),
        other => panic!("unexpected recipe: {other:?}"),
    }
}

#[test]
fn cursor_is_inclusive_on_time_ties() {
    let dir = tempfile::tempdir().unwrap();
    let directory = seeded_directory(&dir);

    let users = directory
        .list_users(
            &UserListQuery::new(10, SortOrder::Descending)
                .with_cursor(PaginationCursor::new(100, "b")),
        )
        .unwrap();
    assert_eq!(ids(&users), vec!["b", "a"]);
}

#[test]
fn ascending_keeps_user_id_descending_for_ties() {
    let dir = tempfile::tempdir().unwrap();
    let directory = seeded_directory(&dir);

    let users = directory
        .list_users(&UserListQuery::new(10, SortOrder::Ascending))
        .unwrap();
    assert_eq!(ids(&users), vec!["b", "a", "c"]);

    let after_cursor = directory
        .list_users(
            &UserListQuery::new(10, SortOrder::Ascending)
                .with_cursor(PaginationCursor::new(100, "a")),
        )
        .unwrap();
    assert_eq!(ids(&after_cursor), vec!["a", "c"]);
}

#[test]
fn recipe_filter_excludes_other_recipes() {
    let dir = tempfile::tempdir().unwrap();
    let directory = seeded_directory(&dir);
    let filter = [RecipeId::EmailPassword, RecipeId::Passwordless];

    let users = directory
        .list_users(&UserListQuery::new(10, SortOrder::Descending).with_recipes(filter))
        .unwrap();
    assert_eq!(ids(&users), vec!["c", "a"]);
    assert!(users
        .iter()
        .all(|user| filter.contains(&user.recipe_id())));

    assert_eq!(directory.count_users(Some(&filter)).unwrap(), 2);
    assert_eq!(directory.count_users(Some(&[RecipeId::ThirdParty])).unwrap(), 1);
    assert_eq!(directory.count_users(None).unwrap(), 3);
}

#[test]
fn pages_chain_through_next_cursor() {
    let dir = tempfile::tempdir().unwrap();
    let directory = seeded_directory(&dir);

    let first = directory
        .list_users_page(&UserListQuery::new(2, SortOrder::Descending))
        .unwrap();
    assert_eq!(ids(&first.users), vec!["c", "b"]);
    let cursor = first.next_cursor.clone().unwrap();
    assert_eq!(cursor, PaginationCursor::new(100, "a"));

    let second = directory
        .list_users_page(&UserListQuery::new(2, SortOrder::Descending).with_cursor(cursor))
        .unwrap();
    assert_eq!(ids(&second.users), vec!["a"]);
    assert!(second.next_cursor.is_none());
}

#[test]
fn unknown_recipe_id_is_an_integrity_fault() {
    let dir = tempfile::tempdir().unwrap();
    let directory = seeded_directory(&dir);
    {
        let conn = directory.coordinator().pool().acquire().unwrap();
        conn.execute(
            "INSERT INTO all_auth_recipe_users (user_id, recipe_id, time_joined)
             VALUES ('z', 'webauthn', 300);",
            [],
        )
        .unwrap();
    }

    let err = directory
        .list_users(&UserListQuery::new(10, SortOrder::Descending))
        .unwrap_err();
    match err {
        StorageError::IntegrityFault(message) => assert!(message.contains("webauthn")),
        other => panic!("unexpected error: {other}"),
    }

    // Rows outside the page are never inspected.
    let older = directory
        .list_users(
            &UserListQuery::new(10, SortOrder::Descending)
                .with_cursor(PaginationCursor::new(200, "c")),
        )
        .unwrap();
    assert_eq!(ids(&older), vec!["c", "b", "a"]);
}

#[test]
fn registry_row_without_detail_is_an_integrity_fault() {
    let dir = tempfile::tempdir().unwrap();
    let directory = seeded_directory(&dir);
    {
        let conn = directory.coordinator().pool().acquire().unwrap();
        SqliteRegistryRepository::new(&conn)
            .insert("orphan", RecipeId::EmailPassword, 50)
            .unwrap();
    }

    let err = directory
        .list_users(&UserListQuery::new(10, SortOrder::Descending))
        .unwrap_err();
    assert!(matches!(err, StorageError::IntegrityFault(_)));
    assert!(!err.is_retryable());
    assert!(matches!(
        directory.get_user("orphan").unwrap_err(),
        StorageError::IntegrityFault(_)
    ));
}

#[test]
fn invalid_queries_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let directory = seeded_directory(&dir);

    assert!(matches!(
        directory
            .list_users(&UserListQuery::new(0, SortOrder::Descending))
            .unwrap_err(),
        StorageError::InvalidArgument(_)
    ));
    assert!(matches!(
        directory
            .list_users_page(&UserListQuery::new(5, SortOrder::Descending).with_recipes(Vec::<RecipeId>::new()))
            .unwrap_err(),
        StorageError::InvalidArgument(_)
    ));
}

#[test]
fn get_and_delete_span_registry_and_recipe() {
    let dir = tempfile::tempdir().unwrap();
    let directory = seeded_directory(&dir);

    let user = directory.get_user("b").unwrap().unwrap();
    assert_eq!(user.recipe_id(), RecipeId::ThirdParty);
    assert_eq!(user.time_joined(), 100);

    assert!(directory.delete_user("b").unwrap());
    assert!(!directory.delete_user("b").unwrap());
    assert!(directory.get_user("b").unwrap().is_none());

    let users = directory
        .list_users(&UserListQuery::new(10, SortOrder::Descending))
        .unwrap();
    assert_eq!(ids(&users), vec!["c", "a"]);
}
