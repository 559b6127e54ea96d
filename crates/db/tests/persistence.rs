// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Objects written through one `Database` and read back through a fresh one over the same
//! file, as a restarted process would.

mod support;

#[cfg(test)]
mod tests {
    use crate::support::{self, count, garage};
    use chrono::TimeZone;
    use mica_common::{Complex, FLAG_REVERSED, Identity, MapKey, ObjRef, Object, Slot, Uid, Value};
    use mica_db::{
        CodeLoader, DatabaseConfig, DbError, Gateway, NotFound, RetryPolicy, Target, TxMode,
    };
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;

    fn car_x(g: &Gateway) -> Object {
        let garage = garage(g);
        let car = Object::new(garage.car.clone());
        car.set("speed", Value::Int(120)).unwrap();
        car.set("name", Value::str("X")).unwrap();
        car
    }

    #[test]
    fn test_dub_then_fetch_by_name() {
        let store = support::store();
        let g = store.db.new_thread(None);
        let car = car_x(&g);
        g.dub(&car, "cars/x").unwrap();

        let fetched = g.fetch_by_name("cars/x", 0).unwrap();
        assert!(fetched.ptr_eq(&car));
        assert!(g.exists("cars/x").unwrap());

        let reopened = store.reopen();
        let g2 = reopened.new_thread(None);
        garage(&g2);
        let fetched = g2.fetch_by_name("cars/x", 0).unwrap();
        assert!(!fetched.ptr_eq(&car));
        assert_eq!(fetched.db_id(), car.db_id());
        assert_eq!(fetched.type_name(), "garage.Car");
        assert_eq!(fetched.get("speed").unwrap(), Some(Value::Int(120)));
        assert_eq!(fetched.get("name").unwrap(), Some(Value::str("X")));
        assert!(g2.fetch_by_name("cars/x", 0).unwrap().ptr_eq(&fetched));
    }

    #[test]
    fn test_primitive_values_roundtrip() {
        let store = support::store();
        let g = store.db.new_thread(None);
        let garage = garage(&g);
        let born = chrono_tz::America::Toronto
            .with_ymd_and_hms(1990, 5, 17, 8, 30, 15)
            .unwrap();

        let person = Object::new(garage.person.clone());
        person.set("name", Value::str("Ann")).unwrap();
        person.set("born", Value::Time(born)).unwrap();
        let vehicle = Object::new(garage.vehicle.clone());
        vehicle.set("weight", Value::Float(1250.5)).unwrap();
        vehicle.set("electric", Value::Bool(true)).unwrap();
        vehicle.set("engine", Value::Complex(Complex::new(1.5, -2.0))).unwrap();
        vehicle.set("lock", Value::Int(1)).unwrap_err();
        g.dub(&person, "people/ann").unwrap();
        g.dub(&vehicle, "vehicles/v").unwrap();

        let reopened = store.reopen();
        let g2 = reopened.new_thread(None);
        crate::support::garage(&g2);
        let person2 = g2.fetch_by_name("people/ann", 1).unwrap();
        let Some(Value::Time(born2)) = person2.get("born").unwrap() else {
            panic!("born did not decode as a time");
        };
        assert_eq!(born2, born);
        assert_eq!(born2.timezone(), chrono_tz::America::Toronto);

        let vehicle2 = g2.fetch_by_name("vehicles/v", 1).unwrap();
        assert_eq!(vehicle2.get("weight").unwrap(), Some(Value::Float(1250.5)));
        assert_eq!(vehicle2.get("electric").unwrap(), Some(Value::Bool(true)));
        assert_eq!(
            vehicle2.get("engine").unwrap(),
            Some(Value::Complex(Complex::new(1.5, -2.0)))
        );
        assert_eq!(vehicle2.get("speed").unwrap(), None);
        assert_eq!(vehicle2.get("lock").unwrap(), None);
    }

    #[test]
    fn test_references_and_cycles() {
        let store = support::store();
        let g = store.db.new_thread(None);
        let garage = garage(&g);
        let person = Object::new(garage.person.clone());
        person.set("name", Value::str("Ann")).unwrap();
        let car = Object::new(garage.car.clone());
        car.set("owner", Value::obj(&person)).unwrap();
        g.insert(mica_db::Target::Attr(&person, "cars"), Value::obj(&car))
            .unwrap();
        g.dub(&car, "cars/c").unwrap();
        assert!(person.is_stored());

        let reopened = store.reopen();
        let g2 = reopened.new_thread(None);
        crate::support::garage(&g2);

        let shallow = g2.fetch_by_name("cars/c", 0).unwrap();
        let Some(Value::Ref(owner)) = shallow.get("owner").unwrap() else {
            panic!("owner missing");
        };
        assert!(owner.is_proxy());
        assert_eq!(owner.db_id(), person.db_id());

        let owner = g2.resolve_attr(&shallow, "owner", 1).unwrap().unwrap();
        assert_eq!(owner.get("name").unwrap(), Some(Value::str("Ann")));
        let cars = owner.collection("cars").unwrap();
        assert_eq!(cars.len(), 1);
        let Some(Value::Ref(ObjRef::Resolved(back))) = cars.get(0) else {
            panic!("cars[0] was not resolved");
        };
        assert!(back.ptr_eq(&shallow));
        let Some(Value::Ref(ObjRef::Resolved(resolved_owner))) = shallow.get("owner").unwrap() else {
            panic!("owner slot still a proxy");
        };
        assert!(resolved_owner.ptr_eq(&owner));
    }

    #[test]
    fn test_ensure_persisted_is_idempotent() {
        let store = support::store();
        let g = store.db.new_thread(None);
        let car = car_x(&g);
        let id = g.ensure_persisted(&car).unwrap();
        assert_eq!(g.ensure_persisted(&car).unwrap(), id);
        let raw = store.raw();
        assert_eq!(count(&raw, "SELECT count(*) FROM Object WHERE id = ?", id), 1);
        assert_eq!(count(&raw, "SELECT count(*) FROM \"garage.Car\" WHERE id = ?", id), 1);
        assert_eq!(count(&raw, "SELECT count(*) FROM \"garage.Vehicle\" WHERE id = ?", id), 1);
    }

    #[test]
    fn test_colliding_identity_is_reversed() {
        let store = support::store();
        let g = store.db.new_thread(None);
        let first = car_x(&g);
        let taken = g.ensure_persisted(&first).unwrap();

        let second = Object::new(first.type_def().unwrap().clone());
        second.assign_identity(Identity::new(Uid::new(taken, 4242)));
        let id = g.ensure_persisted(&second).unwrap();
        assert_eq!(id, 4242);
        assert!(second.identity().unwrap().is_reversed());
        assert_eq!(
            count(&store.raw(), "SELECT flags FROM Object WHERE id = ?", id),
            FLAG_REVERSED
        );

        let reopened = store.reopen();
        let g2 = reopened.new_thread(None);
        garage(&g2);
        let fetched = g2.fetch(4242, 0).unwrap();
        assert_eq!(fetched.identity(), second.identity());
    }

    #[test]
    fn test_both_halves_colliding_is_an_integrity_error() {
        let store = support::store();
        let g = store.db.new_thread(None);
        let a = car_x(&g);
        let b = Object::new(a.type_def().unwrap().clone());
        let a_id = g.ensure_persisted(&a).unwrap();
        let b_id = g.ensure_persisted(&b).unwrap();

        let c = Object::new(a.type_def().unwrap().clone());
        c.assign_identity(Identity::new(Uid::new(a_id, b_id)));
        assert!(matches!(g.ensure_persisted(&c), Err(DbError::Integrity(_))));
        assert!(!c.is_stored());
    }

    #[test]
    fn test_failed_persist_leaves_no_rows_and_can_be_retried() {
        let store = support::store();
        let g = store.db.new_thread(None);
        let garage = garage(&g);
        let a_id = g.ensure_persisted(&Object::new(garage.person.clone())).unwrap();
        let b_id = g.ensure_persisted(&Object::new(garage.person.clone())).unwrap();

        // Both halves of the driver's identity are taken, so the car fails part way through.
        let driver = Object::new(garage.person.clone());
        driver.assign_identity(Identity::new(Uid::new(a_id, b_id)));
        let owner = Object::new(garage.person.clone());
        let car = car_x(&g);
        car.assign_identity(Identity::new(Uid::new(777, 778)));
        car.set("owner", Value::obj(&owner)).unwrap();
        g.map_put(
            Target::Attr(&car, "drivers"),
            MapKey::Str("night".to_string()),
            Value::obj(&driver),
        )
        .unwrap();

        assert!(matches!(g.ensure_persisted(&car), Err(DbError::Integrity(_))));
        assert!(!car.is_stored());
        assert!(!owner.is_stored());
        let raw = store.raw();
        for sql in [
            "SELECT count(*) FROM Object WHERE id = ?",
            "SELECT count(*) FROM \"garage.Car\" WHERE id = ?",
            "SELECT count(*) FROM \"garage.Vehicle\" WHERE id = ?",
            "SELECT count(*) FROM \"garage.Vehicle.owner\" WHERE id0 = ?",
        ] {
            assert_eq!(count(&raw, sql, 777), 0, "{sql}");
        }
        assert_eq!(
            count(&raw, "SELECT count(*) FROM Object WHERE id <> ?", 0),
            2,
            "only the two earlier people remain"
        );

        g.map_remove(Target::Attr(&car, "drivers"), &MapKey::Str("night".to_string()))
            .unwrap();
        assert_eq!(g.ensure_persisted(&car).unwrap(), 777);
        assert!(owner.is_stored());
        assert_eq!(
            count(&raw, "SELECT count(*) FROM \"garage.Vehicle\" WHERE id = ?", 777),
            1
        );
    }

    #[test]
    fn test_delete_removes_rows_and_names() {
        let store = support::store();
        let g = store.db.new_thread(None);
        let car = car_x(&g);
        g.dub(&car, "cars/doomed").unwrap();
        let id = car.db_id().unwrap();
        g.delete(&car).unwrap();

        assert!(!car.is_stored());
        assert!(!g.exists("cars/doomed").unwrap());
        assert!(matches!(
            g.fetch(id, 0),
            Err(DbError::NotFound(NotFound::Object(missing))) if missing == id
        ));
        let raw = store.raw();
        assert_eq!(count(&raw, "SELECT count(*) FROM Object WHERE id = ?", id), 0);
        assert_eq!(count(&raw, "SELECT count(*) FROM \"garage.Vehicle\" WHERE id = ?", id), 0);
        assert_eq!(count(&raw, "SELECT count(*) FROM \"garage.Car\" WHERE id = ?", id), 0);
    }

    #[test]
    fn test_dangling_reference_reads_as_unset_and_is_swept() {
        let store = support::store();
        let g = store.db.new_thread(None);
        let garage = garage(&g);
        let person = Object::new(garage.person.clone());
        let car = Object::new(garage.car.clone());
        g.dub(&car, "cars/orphan").unwrap();
        g.set_attr(&car, "owner", Value::obj(&person)).unwrap();
        assert!(person.is_stored());
        g.delete(&person).unwrap();

        let reopened = store.reopen();
        let g2 = reopened.new_thread(None);
        crate::support::garage(&g2);
        let orphan = g2.fetch_by_name("cars/orphan", 1).unwrap();
        assert_eq!(orphan.get("owner").unwrap(), None);
        assert_eq!(g2.sweep_dangling_references().unwrap(), 1);
        assert_eq!(g2.sweep_dangling_references().unwrap(), 0);
    }

    #[test]
    fn test_fetch_attribute() {
        let store = support::store();
        let g = store.db.new_thread(None);
        let car = car_x(&g);
        g.dub(&car, "cars/x").unwrap();
        let id = car.db_id().unwrap();
        assert!(matches!(
            g.fetch_attribute(&car, "owner", 0),
            Err(DbError::NotFound(NotFound::Attribute { owner, .. })) if owner == id
        ));
        g.set_attr(&car, "speed", Value::Int(99)).unwrap();
        assert_eq!(
            g.fetch_attribute(&car, "speed", 0).unwrap(),
            Some(Slot::One(Value::Int(99)))
        );
        g.clear_attr(&car, "speed").unwrap();
        assert_eq!(g.fetch_attribute(&car, "speed", 0).unwrap(), None);
        assert_eq!(car.get("speed").unwrap(), None);
    }

    #[test]
    fn test_rollback_discards_writes() {
        let store = support::store();
        let g = store.db.new_thread(None);
        let car = car_x(&g);
        g.dub(&car, "cars/x").unwrap();
        let result: Result<(), DbError> = g.transaction(TxMode::Immediate, |g| {
            g.set_attr(&car, "speed", Value::Int(5))?;
            Err(DbError::Integrity("abandon".to_string()))
        });
        assert!(result.is_err());
        assert!(!g.holds_connection());

        let reopened = store.reopen();
        let g2 = reopened.new_thread(None);
        garage(&g2);
        let fetched = g2.fetch_by_name("cars/x", 0).unwrap();
        assert_eq!(fetched.get("speed").unwrap(), Some(Value::Int(120)));
    }

    #[test]
    fn test_names_and_rename() {
        let store = support::store();
        let g = store.db.new_thread(None);
        let car = car_x(&g);
        g.dub(&car, "cars/a").unwrap();
        assert_eq!(g.name_of(&car).unwrap(), Some("cars/a".to_string()));
        assert!(g.rename("cars/a", "cars/b").unwrap());
        assert!(!g.exists("cars/a").unwrap());
        assert!(g.exists("cars/b").unwrap());
        assert!(!g.rename("cars/a", "cars/c").unwrap());
        assert_eq!(g.names("cars/").unwrap(), vec!["cars/b".to_string()]);
        assert_eq!(g.names("people/").unwrap(), Vec::<String>::new());
        assert!(g.unname("cars/b").unwrap());
        assert!(car.is_stored());
        assert!(matches!(
            g.fetch_by_name("cars/b", 0),
            Err(DbError::NotFound(NotFound::Name(_)))
        ));
    }

    #[test]
    fn test_names_are_never_taken_silently() {
        let store = support::store();
        let g = store.db.new_thread(None);
        let a = car_x(&g);
        let b = car_x(&g);
        let a_id = g.dub(&a, "roots/a").unwrap();
        assert_eq!(g.dub(&a, "roots/a").unwrap(), a_id);

        assert!(matches!(
            g.dub(&a, "roots/a2"),
            Err(DbError::AlreadyNamed { id, name }) if id == a_id && name == "roots/a"
        ));
        assert!(!g.exists("roots/a2").unwrap());

        assert!(matches!(
            g.dub(&b, "roots/a"),
            Err(DbError::NameInUse { holder, .. }) if holder == a_id
        ));
        assert!(!b.is_stored(), "a refused name persists nothing");
        assert_eq!(g.name_of(&a).unwrap(), Some("roots/a".to_string()));

        g.dub(&b, "roots/b").unwrap();
        assert!(matches!(
            g.rename("roots/b", "roots/a"),
            Err(DbError::NameInUse { holder, .. }) if holder == a_id
        ));
        assert_eq!(g.name_of(&a).unwrap(), Some("roots/a".to_string()));
        assert_eq!(g.name_of(&b).unwrap(), Some("roots/b".to_string()));
        assert!(g.rename("roots/b", "roots/b").unwrap());
        assert!(g.fetch_by_name("roots/a", 0).unwrap().ptr_eq(&a));
    }

    struct GarageLoader;

    impl CodeLoader for GarageLoader {
        fn load_type(&self, full_type_name: &str, gateway: &Gateway) -> Result<(), DbError> {
            assert!(full_type_name.starts_with("garage."));
            garage(gateway);
            Ok(())
        }
    }

    #[test]
    fn test_unknown_types_go_through_the_loader() {
        let store = support::store();
        let g = store.db.new_thread(None);
        let car = car_x(&g);
        let id = g.ensure_persisted(&car).unwrap();

        let without_loader = store.reopen();
        let g2 = without_loader.new_thread(None);
        assert!(matches!(
            g2.fetch(id, 0),
            Err(DbError::NotFound(NotFound::Type(t))) if t == "garage.Car"
        ));

        let with_loader = store.reopen();
        with_loader.set_loader(Arc::new(GarageLoader));
        let g3 = with_loader.new_thread(None);
        let fetched = g3.fetch(id, 0).unwrap();
        assert_eq!(fetched.get("speed").unwrap(), Some(Value::Int(120)));
    }

    #[test]
    fn test_loading_a_type_inside_a_read_transaction_writes_nothing() {
        let store = support::store();
        let g = store.db.new_thread(None);
        let car = car_x(&g);
        let owner = Object::new(garage(&g).person);
        owner.set("name", Value::str("Ann")).unwrap();
        car.set("owner", Value::obj(&owner)).unwrap();
        let id = g.ensure_persisted(&car).unwrap();

        let reopened = support::open(
            &store.path(),
            DatabaseConfig {
                retry: RetryPolicy {
                    max_attempts: 2,
                    base_step: Duration::from_millis(1),
                    widened_step: Duration::from_millis(1),
                    jitter: false,
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        reopened.set_loader(Arc::new(GarageLoader));
        let writer = reopened.new_thread(None);
        let reader = reopened.new_thread(None);
        writer.acquire().unwrap();
        reader.acquire().unwrap();
        writer.release();
        reader.release();
        writer.begin(TxMode::Immediate).unwrap();

        let fetched = reader
            .transaction(TxMode::Deferred, |g| g.fetch(id, 1))
            .unwrap();
        assert_eq!(fetched.get("speed").unwrap(), Some(Value::Int(120)));
        let Some(Value::Ref(ObjRef::Resolved(owner))) = fetched.get("owner").unwrap() else {
            panic!("owner was not fetched");
        };
        assert_eq!(owner.get("name").unwrap(), Some(Value::str("Ann")));
        writer.rollback().unwrap();
    }
}
