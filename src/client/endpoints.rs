//! Atlas endpoint paths for each API trait.

use reqwest::Method;

use super::{AtlasClient, access_list_segments, page_query};
use crate::api::{
    AccessListApi, AccessListEntry, AccessListScope, ApiFuture, ContainerRequest,
    CustomZoneMappingsRequest, GlobalClusterApi, GlobalClusterConfig, ManagedNamespace,
    NetworkContainer, NetworkContainerApi, NetworkPeering, NetworkPeeringApi, OutageSimulation,
    OutageSimulationApi, OutageSimulationRequest, Page, PageRequest, PeeringRequest,
};

impl OutageSimulationApi for AtlasClient {
    fn start_outage_simulation<'a>(
        &'a self,
        project_id: &'a str,
        cluster_name: &'a str,
        request: &'a OutageSimulationRequest,
    ) -> ApiFuture<'a, OutageSimulation> {
        Box::pin(async move {
            let url = self.url(&["groups", project_id, "clusters", cluster_name, "outageSimulation"])?;
            self.fetch(self.request(Method::POST, url).json(request)).await
        })
    }

    fn get_outage_simulation<'a>(
        &'a self,
        project_id: &'a str,
        cluster_name: &'a str,
    ) -> ApiFuture<'a, OutageSimulation> {
        Box::pin(async move {
            let url = self.url(&["groups", project_id, "clusters", cluster_name, "outageSimulation"])?;
            self.fetch(self.request(Method::GET, url)).await
        })
    }

    fn end_outage_simulation<'a>(
        &'a self,
        project_id: &'a str,
        cluster_name: &'a str,
    ) -> ApiFuture<'a, OutageSimulation> {
        Box::pin(async move {
            let url = self.url(&["groups", project_id, "clusters", cluster_name, "outageSimulation"])?;
            self.fetch(self.request(Method::DELETE, url)).await
        })
    }
}

impl NetworkContainerApi for AtlasClient {
    fn create_container<'a>(
        &'a self,
        project_id: &'a str,
        request: &'a ContainerRequest,
    ) -> ApiFuture<'a, NetworkContainer> {
        Box::pin(async move {
            let url = self.url(&["groups", project_id, "containers"])?;
            self.fetch(self.request(Method::POST, url).json(request)).await
        })
    }

    fn get_container<'a>(
        &'a self,
        project_id: &'a str,
        container_id: &'a str,
    ) -> ApiFuture<'a, NetworkContainer> {
        Box::pin(async move {
            let url = self.url(&["groups", project_id, "containers", container_id])?;
            self.fetch(self.request(Method::GET, url)).await
        })
    }

    fn update_container<'a>(
        &'a self,
        project_id: &'a str,
        container_id: &'a str,
        request: &'a ContainerRequest,
    ) -> ApiFuture<'a, NetworkContainer> {
        Box::pin(async move {
            let url = self.url(&["groups", project_id, "containers", container_id])?;
            self.fetch(self.request(Method::PATCH, url).json(request)).await
        })
    }

    fn delete_container<'a>(
        &'a self,
        project_id: &'a str,
        container_id: &'a str,
    ) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            let url = self.url(&["groups", project_id, "containers", container_id])?;
            self.discard(self.request(Method::DELETE, url)).await
        })
    }
}

impl NetworkPeeringApi for AtlasClient {
    fn create_peering<'a>(
        &'a self,
        project_id: &'a str,
        request: &'a PeeringRequest,
    ) -> ApiFuture<'a, NetworkPeering> {
        Box::pin(async move {
            let url = self.url(&["groups", project_id, "peers"])?;
            self.fetch(self.request(Method::POST, url).json(request)).await
        })
    }

    fn get_peering<'a>(
        &'a self,
        project_id: &'a str,
        peer_id: &'a str,
    ) -> ApiFuture<'a, NetworkPeering> {
        Box::pin(async move {
            let url = self.url(&["groups", project_id, "peers", peer_id])?;
            self.fetch(self.request(Method::GET, url)).await
        })
    }

    fn update_peering<'a>(
        &'a self,
        project_id: &'a str,
        peer_id: &'a str,
        request: &'a PeeringRequest,
    ) -> ApiFuture<'a, NetworkPeering> {
        Box::pin(async move {
            let url = self.url(&["groups", project_id, "peers", peer_id])?;
            self.fetch(self.request(Method::PATCH, url).json(request)).await
        })
    }

    fn delete_peering<'a>(&'a self, project_id: &'a str, peer_id: &'a str) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            let url = self.url(&["groups", project_id, "peers", peer_id])?;
            self.discard(self.request(Method::DELETE, url)).await
        })
    }
}

impl GlobalClusterApi for AtlasClient {
    fn get_global_cluster_config<'a>(
        &'a self,
        project_id: &'a str,
        cluster_name: &'a str,
    ) -> ApiFuture<'a, GlobalClusterConfig> {
        Box::pin(async move {
            let url = self.url(&["groups", project_id, "clusters", cluster_name, "globalWrites"])?;
            self.fetch(self.request(Method::GET, url)).await
        })
    }

    fn create_managed_namespace<'a>(
        &'a self,
        project_id: &'a str,
        cluster_name: &'a str,
        namespace: &'a ManagedNamespace,
    ) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            let url = self.url(&[
                "groups",
                project_id,
                "clusters",
                cluster_name,
                "globalWrites",
                "managedNamespaces",
            ])?;
            self.discard(self.request(Method::POST, url).json(namespace))
                .await
        })
    }

    fn delete_managed_namespace<'a>(
        &'a self,
        project_id: &'a str,
        cluster_name: &'a str,
        db: &'a str,
        collection: &'a str,
    ) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            let url = self.url(&[
                "groups",
                project_id,
                "clusters",
                cluster_name,
                "globalWrites",
                "managedNamespaces",
            ])?;
            let query = [("db", db), ("collection", collection)];
            self.discard(self.request(Method::DELETE, url).query(&query))
                .await
        })
    }

    fn create_custom_zone_mappings<'a>(
        &'a self,
        project_id: &'a str,
        cluster_name: &'a str,
        request: &'a CustomZoneMappingsRequest,
    ) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            let url = self.url(&[
                "groups",
                project_id,
                "clusters",
                cluster_name,
                "globalWrites",
                "customZoneMapping",
            ])?;
            self.discard(self.request(Method::POST, url).json(request))
                .await
        })
    }

    fn delete_all_custom_zone_mappings<'a>(
        &'a self,
        project_id: &'a str,
        cluster_name: &'a str,
    ) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            let url = self.url(&[
                "groups",
                project_id,
                "clusters",
                cluster_name,
                "globalWrites",
                "customZoneMapping",
            ])?;
            self.discard(self.request(Method::DELETE, url)).await
        })
    }
}

impl AccessListApi for AtlasClient {
    fn create_access_list_entries<'a>(
        &'a self,
        scope: &'a AccessListScope,
        entries: &'a [AccessListEntry],
    ) -> ApiFuture<'a, Page<AccessListEntry>> {
        Box::pin(async move {
            let url = self.url(&access_list_segments(scope))?;
            self.fetch(self.request(Method::POST, url).json(entries))
                .await
        })
    }

    fn list_access_list_entries<'a>(
        &'a self,
        scope: &'a AccessListScope,
        page: PageRequest,
    ) -> ApiFuture<'a, Page<AccessListEntry>> {
        Box::pin(async move {
            let url = self.url(&access_list_segments(scope))?;
            self.fetch(self.request(Method::GET, url).query(&page_query(page)))
                .await
        })
    }

    fn delete_access_list_entry<'a>(
        &'a self,
        scope: &'a AccessListScope,
        entry: &'a str,
    ) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            let mut segments = access_list_segments(scope);
            segments.push(entry);
            let url = self.url(&segments)?;
            self.discard(self.request(Method::DELETE, url)).await
        })
    }
}
