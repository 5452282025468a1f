//! Entities hosted by the behaviour scenarios.

use entity_runtime::{Effect, EntityRegistry, EventSourcedEntity, ValueEntity};

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LineItem {
    #[prost(string, tag = "1")]
    pub product_id: String,
    #[prost(int32, tag = "2")]
    pub quantity: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Cart {
    #[prost(message, repeated, tag = "1")]
    pub items: Vec<LineItem>,
}

impl Cart {
    pub fn quantity_of(&self, product_id: &str) -> Option<i32> {
        self.items
            .iter()
            .find(|item| item.product_id == product_id)
            .map(|item| item.quantity)
    }

    fn add(&mut self, added: &LineItem) {
        match self
            .items
            .iter_mut()
            .find(|item| item.product_id == added.product_id)
        {
            Some(item) => item.quantity += added.quantity,
            None => self.items.push(added.clone()),
        }
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AddLineItem {
    #[prost(string, tag = "1")]
    pub product_id: String,
    #[prost(int32, tag = "2")]
    pub quantity: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RemoveLineItem {
    #[prost(string, tag = "1")]
    pub product_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetCart {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ItemAdded {
    #[prost(message, optional, tag = "1")]
    pub item: Option<LineItem>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ItemRemoved {
    #[prost(string, tag = "1")]
    pub product_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Profile {
    #[prost(string, tag = "1")]
    pub name: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChangeName {
    #[prost(string, tag = "1")]
    pub name: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Empty {}

fn apply_added(cart: &mut Cart, event: ItemAdded) {
    if let Some(item) = event.item {
        cart.add(&item);
    }
}

fn apply_removed(cart: &mut Cart, event: ItemRemoved) {
    cart.items.retain(|item| item.product_id != event.product_id);
}

pub fn shopping_cart() -> EventSourcedEntity<Cart> {
    EventSourcedEntity::new("cart")
        .command("AddLineItem", |cart: &Cart, cmd: AddLineItem, _| {
            if cmd.quantity <= 0 {
                return Effect::failure(format!(
                    "Cannot add {} of item {}",
                    cmd.quantity, cmd.product_id
                ));
            }
            let event = ItemAdded {
                item: Some(LineItem {
                    product_id: cmd.product_id,
                    quantity: cmd.quantity,
                }),
            };
            let mut updated = cart.clone();
            apply_added(&mut updated, event.clone());
            Effect::emit("ItemAdded", &event).then_reply(&updated)
        })
        .command("RemoveLineItem", |cart: &Cart, cmd: RemoveLineItem, _| {
            if cart.quantity_of(&cmd.product_id).is_none() {
                return Effect::failure(format!(
                    "Cannot remove item {} because it is not in the cart",
                    cmd.product_id
                ));
            }
            let event = ItemRemoved {
                product_id: cmd.product_id,
            };
            let mut updated = cart.clone();
            apply_removed(&mut updated, event.clone());
            Effect::emit("ItemRemoved", &event).then_reply(&updated)
        })
        .command("GetCart", |cart: &Cart, _: GetCart, _| Effect::reply(cart))
        .event("ItemAdded", apply_added)
        .event("ItemRemoved", apply_removed)
}

pub fn profile() -> ValueEntity<Profile> {
    ValueEntity::new("profile")
        .command("ChangeName", |_: &Profile, cmd: ChangeName, _| {
            let updated = Profile { name: cmd.name };
            Effect::update_state(&updated).then_reply(&updated)
        })
        .command("Delete", |_: &Profile, _: Empty, _| {
            Effect::delete_state().then_reply(&Empty {})
        })
        .command("GetProfile", |profile: &Profile, _: Empty, _| {
            Effect::reply(profile)
        })
}

pub fn registry() -> EntityRegistry {
    EntityRegistry::builder()
        .register(shopping_cart())
        .register(profile())
        .build()
        .expect("fixture entities are valid")
}
